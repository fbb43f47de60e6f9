//! Weighted router: draw uniform over [0, Σweights), pick the first
//! cumulative range that covers the draw. Names sorted lexicographically
//! before ranges are assigned so distributions stay reproducible.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, ElementReceiver, ElementSender};
use async_trait::async_trait;
use rand::Rng;

struct Range {
    name: String,
    upper_bound: f64,
}

pub struct WeightedRouter {
    name: String,
    ranges: Vec<Range>,
    total_weight: f64,
    outputs: OutputTable,
}

impl WeightedRouter {
    pub fn new(name: impl Into<String>, weights: Vec<(String, f64)>) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::InvalidConfig(
                "weighted router needs at least one output".into(),
            ));
        }
        if weights.iter().any(|(_, w)| *w < 0.0) {
            return Err(Error::InvalidConfig(
                "weighted router weights must be non-negative".into(),
            ));
        }
        let mut sorted = weights;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ranges = Vec::with_capacity(sorted.len());
        let mut cumulative = 0.0;
        for (name, weight) in sorted {
            cumulative += weight;
            ranges.push(Range {
                name,
                upper_bound: cumulative,
            });
        }
        if cumulative <= 0.0 {
            return Err(Error::InvalidConfig(
                "weighted router total weight must be > 0".into(),
            ));
        }

        Ok(Self {
            name: name.into(),
            ranges,
            total_weight: cumulative,
            outputs: OutputTable::new(),
        })
    }

    pub fn register_output(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.register(name, sender);
    }

    fn pick(&self, draw: f64) -> &str {
        for range in &self.ranges {
            if draw < range.upper_bound {
                return &range.name;
            }
        }
        &self.ranges.last().expect("validated non-empty").name
    }
}

#[async_trait]
impl Router for WeightedRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl WeightedRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };
            let draw = rand::thread_rng().gen_range(0.0..self.total_weight);
            let name = self.pick(draw).to_string();
            if let Some(sender) = self.outputs.get(&name) {
                send_to_output(&sender, elem, cancel).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StreamElement;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn distribution_roughly_matches_weights() {
        let router = WeightedRouter::new(
            "w",
            vec![("a".into(), 1.0), ("b".into(), 3.0)],
        )
        .unwrap();
        let (a_tx, mut a_rx) = mpsc::channel(4096);
        let (b_tx, mut b_rx) = mpsc::channel(4096);
        router.register_output("a", a_tx);
        router.register_output("b", b_tx);
        let (in_tx, in_rx) = mpsc::channel(4096);
        let cancel = CancelToken::new();
        for _ in 0..2000 {
            in_tx.send(StreamElement::text("x")).await.unwrap();
        }
        drop(in_tx);
        router.process(&cancel, in_rx).await.unwrap();

        let mut counts = HashMap::new();
        let mut total_a = 0;
        while a_rx.recv().await.is_some() {
            total_a += 1;
        }
        counts.insert("a", total_a);
        let mut total_b = 0;
        while b_rx.recv().await.is_some() {
            total_b += 1;
        }
        counts.insert("b", total_b);

        let ratio = counts["b"] as f64 / counts["a"] as f64;
        assert!((2.0..4.5).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn rejects_zero_total_weight() {
        assert!(WeightedRouter::new("w", vec![("a".into(), 0.0)]).is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        assert!(WeightedRouter::new("w", vec![("a".into(), -1.0)]).is_err());
    }

    #[test]
    fn pick_is_deterministic_given_a_draw() {
        let router = WeightedRouter::new(
            "w",
            vec![("b".into(), 5.0), ("a".into(), 5.0)],
        )
        .unwrap();
        // Lexicographic sort puts "a" first with range [0,5), "b" with [5,10).
        assert_eq!(router.pick(0.0), "a");
        assert_eq!(router.pick(4.999), "a");
        assert_eq!(router.pick(5.0), "b");
        assert_eq!(router.pick(9.999), "b");
    }
}
