//! The external `Message` type and its satellites (§6).
//!
//! These are the shapes that cross the boundary between the pipeline and
//! higher-level conversation state: a finished message has a role, text
//! content, an ordered list of parts (text/audio/image/video), any tool
//! calls it made, and bookkeeping (cost, latency, timestamp, source).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Audio sample encoding carried on the wire. PCM16 is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    Pcm16,
    Float32,
    Opus,
    Mp3,
    Aac,
}

impl Default for AudioEncoding {
    fn default() -> Self {
        AudioEncoding::Pcm16
    }
}

/// User-side and model-side default sample rates (§6).
pub const USER_SAMPLE_RATE_HZ: u32 = 16_000;
pub const MODEL_SAMPLE_RATE_HZ: u32 = 24_000;

/// A reference to media stored externally by a `MediaStorage` collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    pub storage_id: String,
    pub mime_type: String,
}

/// Inline or externally-referenced media payload attached to a content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaPayload {
    Inline { data: Vec<u8>, mime_type: String },
    External(MediaReference),
}

impl MediaPayload {
    pub fn is_external(&self) -> bool {
        matches!(self, MediaPayload::External(_))
    }

    pub fn inline_len(&self) -> usize {
        match self {
            MediaPayload::Inline { data, .. } => data.len(),
            MediaPayload::External(_) => 0,
        }
    }
}

/// Content-part type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPartType {
    Text,
    Audio,
    Image,
    Video,
}

/// One ordered piece of a `Message`'s content (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: ContentPartType,
    pub text: Option<String>,
    pub media: Option<MediaPayload>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: ContentPartType::Text,
            text: Some(text.into()),
            media: None,
        }
    }

    pub fn audio_inline(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            part_type: ContentPartType::Audio,
            text: None,
            media: Some(MediaPayload::Inline {
                data,
                mime_type: mime_type.into(),
            }),
        }
    }
}

/// A tool call emitted by the model mid-message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    pub id: String,
    pub name: String,
    /// Raw, provider-serialized argument payload (usually JSON text).
    pub arguments: String,
}

/// The result of a tool invocation, attached back onto a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// A tool response dispatched to the provider session (input side only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: String,
    pub name: String,
    pub content: String,
}

/// A tool definition advertised to the provider at session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Token/dollar accounting for one message or provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// A finished conversational message (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub tool_calls: Vec<MessageToolCall>,
    pub tool_result: Option<ToolResult>,
    pub cost_info: Option<CostInfo>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    pub latency_ms: Option<u64>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub source: Option<String>,
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_result: None,
            cost_info: None,
            meta: HashMap::new(),
            latency_ms: None,
            timestamp: Some(chrono::Utc::now()),
            source: None,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}
