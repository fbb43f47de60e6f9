//! Frame-rate limiter (§4.5): at most one image/video element every
//! `1/target_fps` seconds; everything else passes through unmodified.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropStrategy {
    /// Drop intermediate frames, always emit the most recent qualifying one.
    KeepLatest,
    /// Same target rate, no special handling of the dropped frames.
    Uniform,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub target_fps: f64,
    pub drop_strategy: DropStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            drop_strategy: DropStrategy::KeepLatest,
        }
    }
}

pub struct RateLimitStage {
    name: String,
    config: RateLimitConfig,
    last_emit: Mutex<Option<Instant>>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl RateLimitStage {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            last_emit: Mutex::new(None),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.target_fps.max(0.001))
    }

    fn should_emit(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_emit.lock();
        match *last {
            None => {
                *last = Some(now);
                true
            }
            Some(prev) if now.duration_since(prev) >= self.min_interval() => {
                *last = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
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
            match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => {
                    let is_media = elem.video.is_some() || elem.image.is_some();
                    if !is_media {
                        send_cancellable(&output, elem, cancel).await?;
                        continue;
                    }
                    if self.should_emit() {
                        self.emitted.fetch_add(1, Ordering::Relaxed);
                        send_cancellable(&output, elem, cancel).await?;
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{StreamElement, VideoPayload};
    use tokio::sync::mpsc;

    fn video_elem() -> StreamElement {
        StreamElement::video(VideoPayload {
            bytes: vec![0u8; 4],
            mime_type: "video/raw".into(),
            width: 4,
            height: 4,
            frame_rate: 30.0,
            duration_ms: None,
            format_id: "raw".into(),
            keyframe: true,
            frame_sequence: 0,
        })
    }

    #[tokio::test]
    async fn first_qualifying_element_always_passes() {
        let stage = RateLimitStage::new(
            "rl",
            RateLimitConfig {
                target_fps: 1.0,
                drop_strategy: DropStrategy::KeepLatest,
            },
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx.send(video_elem()).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert!(out_rx.recv().await.is_some());
        assert_eq!(stage.emitted_count(), 1);
    }

    #[tokio::test]
    async fn non_media_elements_always_pass_through() {
        let stage = RateLimitStage::new("rl", RateLimitConfig::default());
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        for _ in 0..5 {
            in_tx.send(StreamElement::text("hi")).await.unwrap();
        }
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        let mut count = 0;
        while out_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(stage.emitted_count(), 0);
    }

    #[tokio::test]
    async fn bursty_frames_above_target_rate_are_dropped() {
        let stage = RateLimitStage::new(
            "rl",
            RateLimitConfig {
                target_fps: 1.0,
                drop_strategy: DropStrategy::KeepLatest,
            },
        );
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancelToken::new();

        for _ in 0..5 {
            in_tx.send(video_elem()).await.unwrap();
        }
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        let mut count = 0;
        while out_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        assert_eq!(stage.dropped_count(), 4);
    }
}
