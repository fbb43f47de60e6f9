//! The provider streaming session contract (§6) — the duplex bridge's one
//! external collaborator. Grounded in the teacher's `transport::session`
//! `StreamSession` handle, narrowed to the capability set the bridge
//! actually drives.

use crate::cancel::CancelToken;
use crate::element::Metadata;
use crate::error::Result;
use crate::message::{AudioEncoding, CostInfo, MessageToolCall, StreamingToolDefinition, ToolResponse};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A raw audio chunk handed to the session on the input side.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub data: Vec<u8>,
    pub sample_rate_hz: u32,
    pub encoding: AudioEncoding,
}

/// Session creation parameters, assembled from the first input element's
/// metadata by the bridge's lazy-connect path.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub system_instruction: Option<String>,
    pub tools: Vec<StreamingToolDefinition>,
}

/// One chunk of the provider's response stream (§6).
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub delta: Option<String>,
    /// Base64-encoded media delta, as it arrives on the wire.
    pub media_delta: Option<String>,
    pub finish_reason: Option<String>,
    pub cost_info: Option<CostInfo>,
    pub tool_calls: Vec<MessageToolCall>,
    pub interrupted: bool,
    pub metadata: Metadata,
    pub error: Option<crate::error::Error>,
}

/// A live bidirectional conversation handle with an LLM provider.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn send_chunk(&self, cancel: &CancelToken, chunk: MediaChunk) -> Result<()>;
    async fn send_text(&self, cancel: &CancelToken, text: &str) -> Result<()>;
    async fn send_system_context(&self, cancel: &CancelToken, context: &str) -> Result<()>;

    /// Explicit end-of-input signal. Optional capability; default is a
    /// no-op for sessions that infer end-of-turn some other way.
    async fn end_input(&self, _cancel: &CancelToken) -> Result<()> {
        Ok(())
    }

    /// Dispatch tool results back to the provider. Optional capability.
    async fn send_tool_responses(
        &self,
        _cancel: &CancelToken,
        _responses: Vec<ToolResponse>,
    ) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()>;

    /// Hand over the response channel. Implementations must support being
    /// called exactly once; the bridge calls it immediately after session
    /// creation.
    fn take_response_channel(&self) -> mpsc::Receiver<StreamChunk>;
}

/// Creates sessions lazily, on the first input element that carries enough
/// context to do so.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        cancel: &CancelToken,
        config: SessionConfig,
    ) -> Result<std::sync::Arc<dyn ProviderSession>>;
}
