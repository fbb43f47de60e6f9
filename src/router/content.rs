//! Content router: predicate-based fan-out, drop if nothing matches.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::Result;
use crate::message::{AudioEncoding, ContentPartType};
use crate::stage::{recv_cancellable, ElementReceiver};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A pure, total predicate over an element.
pub type Predicate = Arc<dyn Fn(&StreamElement) -> bool + Send + Sync>;

pub fn text_present() -> Predicate {
    Arc::new(|e| e.text.is_some())
}

pub fn audio_present_with_encoding(encoding: AudioEncoding) -> Predicate {
    Arc::new(move |e| matches!(&e.audio, Some(a) if a.encoding == encoding))
}

/// Matches elements carrying `expected` as a payload kind, either directly
/// (`text`/`audio`/`image`/`video`) or via a tagged `content_part`.
pub fn content_type_equals(expected: ContentPartType) -> Predicate {
    Arc::new(move |e| {
        if let Some(part) = &e.content_part {
            if part.part_type == expected {
                return true;
            }
        }
        match expected {
            ContentPartType::Text => e.text.is_some(),
            ContentPartType::Audio => e.audio.is_some(),
            ContentPartType::Image => e.image.is_some(),
            ContentPartType::Video => e.video.is_some(),
        }
    })
}

pub fn match_all() -> Predicate {
    Arc::new(|_| true)
}

struct Rule {
    output_name: String,
    predicate: Predicate,
}

pub struct ContentRouter {
    name: String,
    rules: Vec<Rule>,
    outputs: OutputTable,
    dropped: AtomicU64,
}

impl ContentRouter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            outputs: OutputTable::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add_rule(mut self, output_name: impl Into<String>, predicate: Predicate) -> Self {
        self.rules.push(Rule {
            output_name: output_name.into(),
            predicate,
        });
        self
    }

    pub fn register_output(&self, name: impl Into<String>, sender: crate::stage::ElementSender) {
        self.outputs.register(name, sender);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Router for ContentRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl ContentRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            let mut matched = false;
            for rule in &self.rules {
                if (rule.predicate)(&elem) {
                    matched = true;
                    if let Some(sender) = self.outputs.get(&rule.output_name) {
                        send_to_output(&sender, elem.clone(), cancel).await?;
                    }
                }
            }
            if !matched {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{AudioPayload, Priority};
    use crate::stage::ElementSender;
    use tokio::sync::mpsc;

    fn router_with_two_outputs() -> (ContentRouter, mpsc::Receiver<StreamElement>, mpsc::Receiver<StreamElement>) {
        let router = ContentRouter::new("content")
            .add_rule("text-out", text_present())
            .add_rule("audio-out", audio_present_with_encoding(AudioEncoding::Pcm16));
        let (text_tx, text_rx): (ElementSender, _) = mpsc::channel(8);
        let (audio_tx, audio_rx): (ElementSender, _) = mpsc::channel(8);
        router.register_output("text-out", text_tx);
        router.register_output("audio-out", audio_tx);
        (router, text_rx, audio_rx)
    }

    #[tokio::test]
    async fn routes_to_every_matching_rule_and_drops_unmatched() {
        let (router, mut text_rx, mut audio_rx) = router_with_two_outputs();
        let (in_tx, in_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("hello")).await.unwrap();
        let mut video_elem = StreamElement::default();
        video_elem.priority = Priority::Normal;
        in_tx.send(video_elem).await.unwrap();
        drop(in_tx);

        router.process(&cancel, in_rx).await.unwrap();

        assert_eq!(text_rx.recv().await.unwrap().text.as_deref(), Some("hello"));
        assert!(text_rx.recv().await.is_none());
        assert!(audio_rx.recv().await.is_none());
        assert_eq!(router.dropped_count(), 1);
    }

    #[tokio::test]
    async fn closes_every_registered_output_on_input_close() {
        let (router, mut text_rx, mut audio_rx) = router_with_two_outputs();
        let (in_tx, in_rx) = mpsc::channel(8);
        drop(in_tx);
        let cancel = CancelToken::new();

        router.process(&cancel, in_rx).await.unwrap();
        assert!(text_rx.recv().await.is_none());
        assert!(audio_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_to_multiple_outputs_shares_element_by_clone() {
        let router = ContentRouter::new("content")
            .add_rule("a", match_all())
            .add_rule("b", match_all());
        let (a_tx, mut a_rx): (ElementSender, _) = mpsc::channel(8);
        let (b_tx, mut b_rx): (ElementSender, _) = mpsc::channel(8);
        router.register_output("a", a_tx);
        router.register_output("b", b_tx);
        let (in_tx, in_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("dup")).await.unwrap();
        drop(in_tx);
        router.process(&cancel, in_rx).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().text.as_deref(), Some("dup"));
        assert_eq!(b_rx.recv().await.unwrap().text.as_deref(), Some("dup"));
    }

    #[test]
    fn audio_predicate_checks_encoding() {
        let pred = audio_present_with_encoding(AudioEncoding::Opus);
        let pcm = StreamElement::audio(AudioPayload::pcm16(vec![1], 16_000));
        assert!(!pred(&pcm));
    }

    #[tokio::test]
    async fn content_type_routes_by_payload_kind_not_source() {
        let router = ContentRouter::new("content")
            .add_rule("text-out", content_type_equals(crate::message::ContentPartType::Text))
            .add_rule("audio-out", content_type_equals(crate::message::ContentPartType::Audio));
        let (text_tx, mut text_rx): (ElementSender, _) = mpsc::channel(8);
        let (audio_tx, mut audio_rx): (ElementSender, _) = mpsc::channel(8);
        router.register_output("text-out", text_tx);
        router.register_output("audio-out", audio_tx);
        let (in_tx, in_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        let mut text_elem = StreamElement::text("hi");
        text_elem.source = Some("audio-out".to_string());
        in_tx.send(text_elem).await.unwrap();
        in_tx
            .send(StreamElement::audio(AudioPayload::pcm16(vec![9], 16_000)))
            .await
            .unwrap();
        drop(in_tx);

        router.process(&cancel, in_rx).await.unwrap();

        assert_eq!(text_rx.recv().await.unwrap().text.as_deref(), Some("hi"));
        assert!(audio_rx.recv().await.unwrap().audio.is_some());
    }
}
