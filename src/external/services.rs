//! VAD, STT, TTS, interruption, and variable-provider contracts (§6).
//! Each is a narrow single-method trait; the stages in [`crate::stages`]
//! hold a `dyn` implementation of whichever ones they need.

use crate::element::AudioPayload;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A speech/silence transition observed over a window of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    Speech,
    Silence,
}

#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    async fn observe(&self, audio: &AudioPayload) -> Result<VadEvent>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &AudioPayload) -> Result<String>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioPayload>;
}

/// Consulted by the interruption-aware TTS stage and the VAD turn
/// accumulator around an in-flight synthesis or accumulation.
#[async_trait]
pub trait InterruptionHandler: Send + Sync {
    async fn is_interrupted(&self) -> bool;
    async fn on_bot_speaking_started(&self) {}
    async fn on_bot_speaking_stopped(&self) {}
}

/// Resolves a named set of template variables once per variable-provider
/// stage invocation; failing providers abort the stage.
#[async_trait]
pub trait VariableProvider: Send + Sync {
    async fn resolve(&self) -> Result<HashMap<String, String>>;
}
