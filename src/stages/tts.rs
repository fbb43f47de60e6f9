//! TTS stage (§4.5, Transform), with an optional interruption-aware mode:
//! when an `InterruptionHandler` is configured, it is consulted before and
//! after synthesis; an interruption observed at either point discards the
//! synthesized audio instead of emitting it.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::Result;
use crate::external::services::{InterruptionHandler, TextToSpeech};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct TtsConfig {
    pub sample_rate_hz: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: crate::message::MODEL_SAMPLE_RATE_HZ,
        }
    }
}

pub struct TtsStage {
    name: String,
    config: TtsConfig,
    tts: Arc<dyn TextToSpeech>,
    interruption: Option<Arc<dyn InterruptionHandler>>,
}

impl TtsStage {
    pub fn new(
        name: impl Into<String>,
        config: TtsConfig,
        tts: Arc<dyn TextToSpeech>,
        interruption: Option<Arc<dyn InterruptionHandler>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            tts,
            interruption,
        }
    }

    fn extract_text(elem: &StreamElement) -> Option<String> {
        if let Some(text) = &elem.text {
            return Some(text.clone());
        }
        let message = elem.message.as_ref()?;
        if !message.content.is_empty() {
            return Some(message.content.clone());
        }
        message.parts.iter().find_map(|p| p.text.clone())
    }
}

#[async_trait]
impl Stage for TtsStage {
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

            let text = match Self::extract_text(&elem) {
                Some(text) if !text.is_empty() => text,
                _ => {
                    send_cancellable(&output, elem, cancel).await?;
                    continue;
                }
            };

            if let Some(handler) = &self.interruption {
                if handler.is_interrupted().await {
                    continue;
                }
                handler.on_bot_speaking_started().await;
            }

            let synthesis = self.tts.synthesize(&text).await;

            if let Some(handler) = &self.interruption {
                let interrupted_after = handler.is_interrupted().await;
                handler.on_bot_speaking_stopped().await;
                if interrupted_after {
                    continue;
                }
            }

            match synthesis {
                Ok(mut audio) => {
                    if audio.sample_rate_hz == 0 {
                        audio.sample_rate_hz = self.config.sample_rate_hz;
                    }
                    send_cancellable(&output, StreamElement::audio(audio), cancel).await?;
                }
                Err(err) => {
                    send_cancellable(&output, StreamElement::error(err), cancel).await?;
                }
            }
        }
    }
}
