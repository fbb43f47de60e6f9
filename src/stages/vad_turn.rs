//! VAD turn accumulator (§4.5, Accumulate): buffers audio chunks into one
//! complete turn, emitted at the earliest of silence-after-speech, a max
//! turn duration, or input close with a non-empty buffer.

use crate::cancel::CancelToken;
use crate::element::{AudioPayload, StreamElement};
use crate::error::Result;
use crate::external::services::{InterruptionHandler, VadEvent, VoiceActivityDetector};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct VadTurnConfig {
    pub silence_duration: Duration,
    pub min_speech_duration: Duration,
    pub max_turn_duration: Duration,
}

impl Default for VadTurnConfig {
    fn default() -> Self {
        Self {
            silence_duration: Duration::from_millis(700),
            min_speech_duration: Duration::from_millis(200),
            max_turn_duration: Duration::from_secs(30),
        }
    }
}

struct TurnState {
    samples: Vec<u8>,
    sample_rate_hz: u32,
    channels: u16,
    encoding: crate::message::AudioEncoding,
    turn_started_at: Instant,
    speech_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
}

impl TurnState {
    fn new(audio: &AudioPayload) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate_hz: audio.sample_rate_hz,
            channels: audio.channels,
            encoding: audio.encoding,
            turn_started_at: Instant::now(),
            speech_started_at: None,
            silence_started_at: None,
        }
    }

    fn into_element(self) -> StreamElement {
        let payload = AudioPayload {
            samples: self.samples,
            sample_rate_hz: self.sample_rate_hz,
            channels: self.channels,
            encoding: self.encoding,
            duration_ms: None,
        };
        StreamElement::audio(payload).with_metadata("turn_complete".into(), serde_json::Value::Bool(true))
    }
}

pub struct VadTurnStage {
    name: String,
    config: VadTurnConfig,
    vad: Arc<dyn VoiceActivityDetector>,
    interruption: Option<Arc<dyn InterruptionHandler>>,
}

impl VadTurnStage {
    pub fn new(
        name: impl Into<String>,
        config: VadTurnConfig,
        vad: Arc<dyn VoiceActivityDetector>,
        interruption: Option<Arc<dyn InterruptionHandler>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            vad,
            interruption,
        }
    }
}

#[async_trait]
impl Stage for VadTurnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Accumulate
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        let mut turn: Option<TurnState> = None;

        loop {
            let elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => {
                    if let Some(turn) = turn.take() {
                        send_cancellable(&output, turn.into_element(), cancel).await?;
                    }
                    return Ok(());
                }
            };

            if elem.meta_bool("passthrough") {
                send_cancellable(&output, elem, cancel).await?;
                continue;
            }

            let audio = match &elem.audio {
                Some(audio) => audio.clone(),
                None => {
                    send_cancellable(&output, elem, cancel).await?;
                    continue;
                }
            };

            if let Some(handler) = &self.interruption {
                if handler.is_interrupted().await {
                    turn = None;
                    continue;
                }
            }

            let state = turn.get_or_insert_with(|| TurnState::new(&audio));
            state.samples.extend_from_slice(&audio.samples);

            let now = Instant::now();
            match self.vad.observe(&audio).await? {
                VadEvent::Speech => {
                    state.speech_started_at.get_or_insert(now);
                    state.silence_started_at = None;
                }
                VadEvent::Silence => {
                    state.silence_started_at.get_or_insert(now);
                }
            }

            let speech_duration = state
                .speech_started_at
                .map(|t| now.duration_since(t))
                .unwrap_or_default();
            let silence_elapsed = state.silence_started_at.map(|t| now.duration_since(t));
            let turn_duration = now.duration_since(state.turn_started_at);

            let silence_triggered = silence_elapsed
                .map(|silence| {
                    speech_duration >= self.config.min_speech_duration
                        && silence >= self.config.silence_duration
                })
                .unwrap_or(false);
            let max_duration_triggered = turn_duration >= self.config.max_turn_duration;

            if silence_triggered || max_duration_triggered {
                let finished = turn.take().expect("just inserted above");
                send_cancellable(&output, finished.into_element(), cancel).await?;
            }
        }
    }
}
