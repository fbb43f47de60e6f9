//! Debug stage (§4.5, Transform): forwards every element unchanged, logging
//! a bounded JSON snapshot of each one via `tracing::debug!`.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::Result;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct DebugConfig {
    pub max_snapshot_len: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { max_snapshot_len: 2048 }
    }
}

pub struct DebugStage {
    name: String,
    config: DebugConfig,
}

impl DebugStage {
    pub fn new(name: impl Into<String>, config: DebugConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn snapshot(elem: &StreamElement, max_len: usize) -> String {
        let value = serde_json::json!({
            "sequence": elem.sequence,
            "source": elem.source,
            "priority": format!("{:?}", elem.priority),
            "end_of_stream": elem.end_of_stream,
            "has_error": elem.error.is_some(),
            "has_text": elem.text.is_some(),
            "has_audio": elem.audio.is_some(),
            "has_video": elem.video.is_some(),
            "has_image": elem.image.is_some(),
            "has_message": elem.message.is_some(),
            "metadata_keys": elem.metadata.keys().collect::<Vec<_>>(),
        });
        let mut text = value.to_string();
        if text.len() > max_len {
            text.truncate(max_len);
            text.push_str("...");
        }
        text
    }
}

#[async_trait]
impl Stage for DebugStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Transform
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        loop {
            let elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            tracing::debug!(
                stage = %self.name,
                snapshot = %Self::snapshot(&elem, self.config.max_snapshot_len),
                "element observed"
            );

            send_cancellable(&output, elem, cancel).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_every_element_unchanged() {
        let stage = DebugStage::new("dbg", DebugConfig::default());
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("hi")).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap().text.as_deref(), Some("hi"));
    }

    #[test]
    fn snapshot_is_truncated_to_max_len() {
        let elem = StreamElement::text("hi").with_metadata(
            "k".into(),
            serde_json::Value::String("x".repeat(100)),
        );
        let snapshot = DebugStage::snapshot(&elem, 20);
        assert!(snapshot.len() <= 23);
        assert!(snapshot.ends_with("..."));
    }

    #[test]
    fn snapshot_includes_metadata_keys() {
        let elem = StreamElement::text("hi")
            .with_metadata("turn_complete".into(), serde_json::Value::Bool(true));
        let snapshot = DebugStage::snapshot(&elem, 4096);
        assert!(snapshot.contains("turn_complete"));
    }
}
