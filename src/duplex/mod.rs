//! The duplex provider bridge (§4.6): multiplexes a live input stream and a
//! model response stream through one external [`ProviderSession`].
//!
//! [`bridge`] holds the stage itself and its two worker loops; [`state`]
//! holds the synchronization primitives shared between them.
//!
//! [`ProviderSession`]: crate::external::session::ProviderSession

pub mod bridge;
pub mod state;

pub use bridge::{DuplexBridgeConfig, DuplexBridgeStage, SessionSource};
pub use state::DuplexAccumulatorState;
