//! The six literal end-to-end scenarios (§8) plus the duplex bridge happy
//! path, run against the real stage/router implementations.

use async_trait::async_trait;
use convoy_core::duplex::{DuplexBridgeConfig, DuplexBridgeStage, SessionSource};
use convoy_core::element::{AudioPayload, Priority, StreamElement};
use convoy_core::external::services::{VadEvent, VoiceActivityDetector};
use convoy_core::external::session::{MediaChunk, ProviderSession, StreamChunk};
use convoy_core::priority_channel::PriorityChannel;
use convoy_core::router::{key_from_metadata, text_present, ContentRouter, HashRouter, Router, RoundRobinRouter};
use convoy_core::stage::Stage;
use convoy_core::CancelToken;
use convoy_core::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// 1. Round-robin fan-out.
#[tokio::test]
async fn scenario_round_robin_fan_out() {
    let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let router = RoundRobinRouter::new("rr", names).unwrap();
    let (a_tx, mut a_rx) = mpsc::channel(8);
    let (b_tx, mut b_rx) = mpsc::channel(8);
    let (c_tx, mut c_rx) = mpsc::channel(8);
    router.register_output("a", a_tx);
    router.register_output("b", b_tx);
    router.register_output("c", c_tx);

    let (in_tx, in_rx) = mpsc::channel(8);
    let cancel = CancelToken::new();
    for i in 0..6 {
        in_tx.send(StreamElement::text(format!("seq-{i}"))).await.unwrap();
    }
    drop(in_tx);
    router.process(&cancel, in_rx).await.unwrap();

    assert_eq!(a_rx.recv().await.unwrap().text.as_deref(), Some("seq-0"));
    assert_eq!(b_rx.recv().await.unwrap().text.as_deref(), Some("seq-1"));
    assert_eq!(c_rx.recv().await.unwrap().text.as_deref(), Some("seq-2"));
    assert_eq!(a_rx.recv().await.unwrap().text.as_deref(), Some("seq-3"));
    assert_eq!(b_rx.recv().await.unwrap().text.as_deref(), Some("seq-4"));
    assert_eq!(c_rx.recv().await.unwrap().text.as_deref(), Some("seq-5"));
    assert!(a_rx.recv().await.is_none());
    assert!(b_rx.recv().await.is_none());
    assert!(c_rx.recv().await.is_none());
}

// 2. Hash sticky.
#[tokio::test]
async fn scenario_hash_sticky() {
    let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let router = HashRouter::new("h", names, key_from_metadata("session_id")).unwrap();
    let (a_tx, mut a_rx) = mpsc::channel(16);
    let (b_tx, mut b_rx) = mpsc::channel(16);
    let (c_tx, mut c_rx) = mpsc::channel(16);
    router.register_output("a", a_tx);
    router.register_output("b", b_tx);
    router.register_output("c", c_tx);

    let (in_tx, in_rx) = mpsc::channel(16);
    let cancel = CancelToken::new();
    for _ in 0..10 {
        let elem = StreamElement::text("x")
            .with_metadata("session_id".into(), Value::String("session-123".into()));
        in_tx.send(elem).await.unwrap();
    }
    drop(in_tx);
    router.process(&cancel, in_rx).await.unwrap();

    let mut counts = Vec::new();
    for rx in [&mut a_rx, &mut b_rx, &mut c_rx] {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        counts.push(n);
    }
    assert_eq!(counts.iter().filter(|&&n| n == 10).count(), 1);
    assert_eq!(counts.iter().filter(|&&n| n == 0).count(), 2);
}

// 3. Content routing drop.
#[tokio::test]
async fn scenario_content_routing_drop() {
    let router = ContentRouter::new("content").add_rule("text-only", text_present());
    let (text_tx, mut text_rx) = mpsc::channel(8);
    router.register_output("text-only", text_tx);

    let (in_tx, in_rx) = mpsc::channel(8);
    let cancel = CancelToken::new();
    in_tx
        .send(StreamElement::audio(AudioPayload::pcm16(vec![1, 2, 3], 16_000)))
        .await
        .unwrap();
    drop(in_tx);

    router.process(&cancel, in_rx).await.unwrap();
    assert!(text_rx.recv().await.is_none());
    assert_eq!(router.dropped_count(), 1);
}

// 4. Priority channel ordering.
#[tokio::test]
async fn scenario_priority_channel_ordering() {
    let chan = PriorityChannel::new(10).unwrap();
    let cancel = CancelToken::new();

    let mut low = StreamElement::text("low");
    low.priority = Priority::Low;
    let mut critical = StreamElement::text("critical");
    critical.priority = Priority::Critical;
    let mut normal1 = StreamElement::text("normal-1");
    normal1.priority = Priority::Normal;
    let mut high = StreamElement::text("high");
    high.priority = Priority::High;
    let mut normal2 = StreamElement::text("normal-2");
    normal2.priority = Priority::Normal;

    for elem in [low, critical, normal1, high, normal2] {
        chan.send(elem, &cancel).await.unwrap();
    }

    let expected = ["critical", "high", "normal-1", "normal-2", "low"];
    for want in expected {
        let got = chan.recv(&cancel).await.unwrap().unwrap();
        assert_eq!(got.text.as_deref(), Some(want));
    }
}

// 5. Turn VAD accumulation.
struct ScriptedVad {
    speech_budget: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl VoiceActivityDetector for ScriptedVad {
    async fn observe(&self, _audio: &AudioPayload) -> Result<VadEvent> {
        use std::sync::atomic::Ordering;
        if self.speech_budget.load(Ordering::Relaxed) > 0 {
            self.speech_budget.fetch_sub(1, Ordering::Relaxed);
            Ok(VadEvent::Speech)
        } else {
            Ok(VadEvent::Silence)
        }
    }
}

#[tokio::test]
async fn scenario_turn_vad_accumulation() {
    let vad = Arc::new(ScriptedVad {
        speech_budget: std::sync::atomic::AtomicUsize::new(10),
    });
    let config = VadTurnConfig {
        silence_duration: Duration::from_millis(80),
        min_speech_duration: Duration::from_millis(20),
        max_turn_duration: Duration::from_secs(30),
    };
    let stage = VadTurnStage::new("vad", config, vad, None);
    let (in_tx, in_rx) = mpsc::channel(64);
    let (out_tx, mut out_rx) = mpsc::channel(8);
    let cancel = CancelToken::new();

    let mut expected_samples = Vec::new();
    for i in 0..10u8 {
        let samples = vec![i; 20];
        expected_samples.extend_from_slice(&samples);
        in_tx
            .send(StreamElement::audio(AudioPayload::pcm16(samples, 16_000)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for _ in 0..10 {
        in_tx
            .send(StreamElement::audio(AudioPayload::pcm16(vec![0; 4], 16_000)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(90)).await;
    }
    drop(in_tx);

    stage.process(&cancel, in_rx, out_tx).await.unwrap();

    let mut turns = Vec::new();
    while let Some(elem) = out_rx.recv().await {
        turns.push(elem);
    }
    assert_eq!(turns.len(), 1, "exactly one turn should be emitted");
    let turn = &turns[0];
    assert!(turn.meta_bool("turn_complete"));
    // The buffer also picks up whichever trailing silence chunks arrived
    // before the silence timer crossed `silence_duration`, so check the
    // speech samples as a prefix rather than exact equality.
    let samples = &turn.audio.as_ref().unwrap().samples;
    assert!(samples.starts_with(&expected_samples));
}

// 6. Duplex bridge happy path.
struct FakeSession {
    response_rx: parking_lot::Mutex<Option<mpsc::Receiver<StreamChunk>>>,
}

#[async_trait]
impl ProviderSession for FakeSession {
    async fn send_chunk(&self, _cancel: &CancelToken, _chunk: MediaChunk) -> Result<()> {
        Ok(())
    }

    async fn send_text(&self, _cancel: &CancelToken, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn send_system_context(&self, _cancel: &CancelToken, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn take_response_channel(&self) -> mpsc::Receiver<StreamChunk> {
        self.response_rx.lock().take().expect("called exactly once")
    }
}

#[tokio::test]
async fn scenario_duplex_bridge_happy_path() {
    let (chunk_tx, chunk_rx) = mpsc::channel(8);
    let session = Arc::new(FakeSession {
        response_rx: parking_lot::Mutex::new(Some(chunk_rx)),
    });
    let bridge = DuplexBridgeStage::new(
        "bridge",
        DuplexBridgeConfig::default(),
        SessionSource::Preconfigured(session),
    );

    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::channel(8);
    let cancel = CancelToken::new();

    let mut first = StreamElement::audio(AudioPayload::pcm16(vec![1, 2], 16_000));
    first
        .metadata
        .insert("system_prompt".into(), Value::String("SYS".into()));
    in_tx.send(first).await.unwrap();
    in_tx
        .send(StreamElement::audio(AudioPayload::pcm16(vec![3, 4], 16_000)))
        .await
        .unwrap();
    in_tx.send(StreamElement::end_of_stream()).await.unwrap();
    drop(in_tx);

    chunk_tx
        .send(StreamChunk {
            delta: Some("hi".to_string()),
            metadata: [("type".to_string(), Value::String("output_transcription".into()))]
                .into_iter()
                .collect(),
            ..Default::default()
        })
        .await
        .unwrap();
    chunk_tx
        .send(StreamChunk {
            delta: Some(" there".to_string()),
            metadata: [("type".to_string(), Value::String("output_transcription".into()))]
                .into_iter()
                .collect(),
            ..Default::default()
        })
        .await
        .unwrap();
    chunk_tx
        .send(StreamChunk {
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    drop(chunk_tx);

    bridge.process(&cancel, in_rx, out_tx).await.unwrap();

    let mut final_elem = None;
    while let Some(elem) = out_rx.recv().await {
        if elem.end_of_stream {
            final_elem = Some(elem);
        }
    }
    let final_elem = final_elem.expect("a final end-of-stream element");
    let message = final_elem.message.expect("assistant message");
    assert_eq!(message.role, "assistant");
    assert_eq!(message.content, "hi there");
    assert_eq!(message.meta["finish_reason"], Value::String("stop".into()));
}
