//! Hash router: stable `sha256(key) mod k`, empty key always goes to index
//! 0. The same key lands on the same output for the stage's lifetime.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, ElementReceiver, ElementSender};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub type KeyExtractor = Box<dyn Fn(&StreamElement) -> String + Send + Sync>;

pub fn key_from_source() -> KeyExtractor {
    Box::new(|e| e.source.clone().unwrap_or_default())
}

pub fn key_from_metadata(field: &'static str) -> KeyExtractor {
    Box::new(move |e| {
        e.metadata
            .get(field)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    })
}

fn stable_hash_u64(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(buf)
}

pub struct HashRouter {
    name: String,
    output_names: Vec<String>,
    key_of: KeyExtractor,
    outputs: OutputTable,
}

impl HashRouter {
    pub fn new(
        name: impl Into<String>,
        output_names: Vec<String>,
        key_of: KeyExtractor,
    ) -> Result<Self> {
        if output_names.is_empty() {
            return Err(Error::InvalidConfig(
                "hash router needs at least one output".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            output_names,
            key_of,
            outputs: OutputTable::new(),
        })
    }

    pub fn register_output(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.register(name, sender);
    }

    fn index_for(&self, key: &str) -> usize {
        if key.is_empty() {
            return 0;
        }
        (stable_hash_u64(key) % self.output_names.len() as u64) as usize
    }
}

#[async_trait]
impl Router for HashRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl HashRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };
            let key = (self.key_of)(&elem);
            let idx = self.index_for(&key);
            let name = &self.output_names[idx];
            if let Some(sender) = self.outputs.get(name) {
                send_to_output(&sender, elem, cancel).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn router(names: Vec<&str>) -> HashRouter {
        HashRouter::new(
            "h",
            names.into_iter().map(String::from).collect(),
            key_from_source(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn same_key_is_sticky_across_calls() {
        let router = router(vec!["a", "b", "c"]);
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let (c_tx, mut c_rx) = mpsc::channel(8);
        router.register_output("a", a_tx);
        router.register_output("b", b_tx);
        router.register_output("c", c_tx);
        let (in_tx, in_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        for _ in 0..5 {
            in_tx
                .send(StreamElement::text("x").with_source("session-42"))
                .await
                .unwrap();
        }
        drop(in_tx);
        router.process(&cancel, in_rx).await.unwrap();

        let landed_in_a = a_rx.try_recv().is_ok();
        let landed_in_b = b_rx.try_recv().is_ok();
        let landed_in_c = c_rx.try_recv().is_ok();
        let count = [landed_in_a, landed_in_b, landed_in_c]
            .iter()
            .filter(|b| **b)
            .count();
        assert_eq!(count, 1, "every element for one key must land on one output");
    }

    #[tokio::test]
    async fn empty_key_always_goes_to_index_zero() {
        let router = router(vec!["a", "b"]);
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, _b_rx) = mpsc::channel(8);
        router.register_output("a", a_tx);
        router.register_output("b", b_tx);
        let (in_tx, in_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("no-source")).await.unwrap();
        drop(in_tx);
        router.process(&cancel, in_rx).await.unwrap();

        assert!(a_rx.recv().await.is_some());
    }

    #[test]
    fn index_for_is_deterministic() {
        let router = router(vec!["a", "b", "c"]);
        let idx1 = router.index_for("stable-key");
        let idx2 = router.index_for("stable-key");
        assert_eq!(idx1, idx2);
    }
}
