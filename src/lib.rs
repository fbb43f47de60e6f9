//! convoy-core: the pipeline engine that bridges realtime multimodal
//! conversations with LLM providers.
//!
//! A library of composable *stages* connected by typed, backpressure-aware
//! channels carrying one uniform [`element::StreamElement`]. Two subsystems
//! carry most of the weight: the [`router`] family (content/round-robin/
//! weighted/hash/random/broadcast fan-out) and the [`duplex`] provider
//! bridge, which multiplexes a live input stream and a model response
//! stream through one external session.
//!
//! Out of scope, consumed as narrow contracts instead (see [`external`]):
//! concrete provider transports, VAD/STT/TTS implementations, the event
//! bus, media storage backends, and pipeline assembly/configuration
//! loading.

#![warn(clippy::all)]

pub mod cancel;
pub mod duplex;
pub mod element;
pub mod error;
pub mod external;
pub mod latch;
pub mod merge;
pub mod message;
pub mod priority_channel;
pub mod router;
pub mod stage;
pub mod stages;

pub use cancel::CancelToken;
pub use duplex::{DuplexBridgeConfig, DuplexBridgeStage, SessionSource};
pub use element::{AudioPayload, ElementPool, Priority, StreamElement};
pub use error::{Error, Result};
pub use latch::Latch;
pub use message::Message;
pub use priority_channel::PriorityChannel;
pub use stage::{Stage, StageType};
