//! Error taxonomy for the pipeline core.
//!
//! Kinds roughly follow the design's error-handling section: configuration
//! errors are raised before `process` ever runs, resource/session errors
//! are raised by the stage that owns the failing resource, and cancellation
//! is a single variant so every blocking operation can propagate it
//! unchanged.

use thiserror::Error;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Buffer size, timeout, or other stage configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two stages were registered under the same name.
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    /// A router output or merge input was referenced but never registered.
    #[error("stage not found: {0}")]
    StageNotFound(String),

    /// A pipeline was built with no stages.
    #[error("no stages configured")]
    NoStages,

    /// The duplex bridge was started without a session and without enough
    /// input to lazily create one.
    #[error("no provider session configured")]
    NoProvider,

    /// An external collaborator (VAD, STT, TTS, storage) failed.
    #[error("resource error ({resource}): {message}")]
    Resource {
        resource: &'static str,
        message: String,
    },

    /// An external collaborator did not respond in time.
    #[error("{resource} timed out after {millis}ms")]
    Timeout { resource: &'static str, millis: u64 },

    /// Session creation failed; fatal for the duplex bridge.
    #[error("session creation failed: {0}")]
    SessionCreation(String),

    /// Sending to the external session failed for a single element; callers
    /// should log and continue rather than treat this as fatal.
    #[error("session send failed: {0}")]
    SessionSend(String),

    /// The session was closed by the remote end.
    #[error("session closed by remote")]
    RemoteClosed,

    /// A blocking operation observed cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// A destination channel (router output, merge output, stage output) was
    /// dropped by its receiver.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Catch-all for conditions that don't fit the taxonomy above but are
    /// still fatal for the owning stage.
    #[error("execution error: {0}")]
    Execution(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn resource(resource: &'static str, message: impl Into<String>) -> Self {
        Error::Resource {
            resource,
            message: message.into(),
        }
    }
}
