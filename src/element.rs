//! `StreamElement`: the single currency of the pipeline, plus its pool.
//!
//! Payloads are independent `Option` fields rather than a single tagged
//! enum. The design notes for this port briefly considered a tagged sum
//! (one payload, by construction) but the duplex bridge's streaming
//! passthrough genuinely needs to set *both* `text` and `audio` on the same
//! element (an incremental text delta arriving alongside a decoded audio
//! delta in the same chunk) — see `duplex::bridge::chunk_to_element`. A
//! tagged enum cannot express that without smuggling a second payload
//! inside a wrapper, so payloads stay as separate fields and the "at most
//! one populated" rule remains a convention, matched by every stage that
//! only cares about a single field.

use crate::message::{ContentPart, MediaPayload, Message, MessageToolCall};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Free-form cross-stage hint carrier. See the external-interfaces section
/// for the set of conventionally recognized keys.
pub type Metadata = HashMap<String, Value>;

/// Priority used both by `StreamElement::priority` and by the priority
/// channel's four FIFO sub-queues. Ordered so `Critical > High > Normal >
/// Low` under the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Raw audio payload: encoded or raw samples plus the metadata needed to
/// interpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub samples: Vec<u8>,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub encoding: crate::message::AudioEncoding,
    pub duration_ms: Option<u32>,
}

impl AudioPayload {
    pub fn pcm16(samples: Vec<u8>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
            channels: 1,
            encoding: crate::message::AudioEncoding::Pcm16,
            duration_ms: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub duration_ms: Option<u32>,
    pub format_id: String,
    pub keyframe: bool,
    pub frame_sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub format_id: String,
}

/// Global monotonic sequence counter. Stages that mint new elements (rather
/// than deriving them from an input) should stamp them via
/// `StreamElement::next_sequence`.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// The single record flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamElement {
    pub text: Option<String>,
    pub audio: Option<AudioPayload>,
    pub video: Option<VideoPayload>,
    pub image: Option<ImagePayload>,
    pub message: Option<Message>,
    pub tool_call: Option<MessageToolCall>,
    pub content_part: Option<ContentPart>,
    pub media_content: Option<MediaPayload>,

    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
    pub priority: Priority,
    pub metadata: Metadata,

    pub end_of_stream: bool,
    pub error: Option<crate::error::Error>,
}

impl Default for StreamElement {
    fn default() -> Self {
        Self {
            text: None,
            audio: None,
            video: None,
            image: None,
            message: None,
            tool_call: None,
            content_part: None,
            media_content: None,
            sequence: 0,
            created_at: Utc::now(),
            source: None,
            priority: Priority::Normal,
            metadata: Metadata::new(),
            end_of_stream: false,
            error: None,
        }
    }
}

impl StreamElement {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            sequence: next_sequence(),
            priority: Priority::Normal,
            ..Default::default()
        }
    }

    pub fn audio(payload: AudioPayload) -> Self {
        Self {
            audio: Some(payload),
            sequence: next_sequence(),
            priority: Priority::High,
            ..Default::default()
        }
    }

    pub fn video(payload: VideoPayload) -> Self {
        Self {
            video: Some(payload),
            sequence: next_sequence(),
            priority: Priority::High,
            ..Default::default()
        }
    }

    pub fn message(message: Message) -> Self {
        Self {
            message: Some(message),
            sequence: next_sequence(),
            priority: Priority::Normal,
            ..Default::default()
        }
    }

    pub fn end_of_stream() -> Self {
        Self {
            end_of_stream: true,
            sequence: next_sequence(),
            priority: Priority::Critical,
            ..Default::default()
        }
    }

    pub fn error(err: crate::error::Error) -> Self {
        Self {
            error: Some(err),
            sequence: next_sequence(),
            priority: Priority::Critical,
            ..Default::default()
        }
    }

    /// `has-error OR end-of-stream`.
    pub fn is_control(&self) -> bool {
        self.error.is_some() || self.end_of_stream
    }

    /// Any payload set.
    pub fn has_content(&self) -> bool {
        self.text.is_some()
            || self.audio.is_some()
            || self.video.is_some()
            || self.image.is_some()
            || self.message.is_some()
            || self.tool_call.is_some()
            || self.content_part.is_some()
            || self.media_content.is_some()
    }

    /// `!has_content() AND !is_control()`.
    pub fn is_empty(&self) -> bool {
        !self.has_content() && !self.is_control()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Process-wide pool that recycles `StreamElement`s.
///
/// `acquire` hands out an element whose metadata map is non-nil (empty) and
/// whose other fields are at their zero value; `release` clears payloads,
/// timestamps, priority, sequence, source, error, and end-of-stream, but
/// *empties without deallocating* the metadata map so its backing
/// allocation is reused on the next acquire. Because `release` takes the
/// element by value, nothing can keep observing the pre-release state —
/// the Rust port's answer to "using a released element is undefined
/// behavior" in the original design.
#[derive(Clone, Debug)]
pub struct ElementPool {
    free: Arc<Mutex<Vec<StreamElement>>>,
}

impl ElementPool {
    pub fn new() -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acquire(&self) -> StreamElement {
        let recycled = self.free.lock().pop();
        recycled.unwrap_or_default()
    }

    pub fn release(&self, mut element: StreamElement) {
        element.text = None;
        element.audio = None;
        element.video = None;
        element.image = None;
        element.message = None;
        element.tool_call = None;
        element.content_part = None;
        element.media_content = None;
        element.sequence = 0;
        element.created_at = Utc::now();
        element.source = None;
        element.priority = Priority::Normal;
        element.end_of_stream = false;
        element.error = None;
        element.metadata.clear();
        self.free.lock().push(element);
    }

    /// Number of elements currently parked in the free list.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ElementPool {
    fn default() -> Self {
        Self::new()
    }
}
