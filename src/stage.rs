//! The common stage contract (§4.1).
//!
//! Every stage reads from one receive-only channel and writes to one
//! send-only channel (routers and merge extend this with additional
//! surface in their own modules but keep this same shape underneath). A
//! stage owns closing its output — in Rust terms, dropping the `Sender` —
//! on every exit path, and never closes its input.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What role a stage plays in the pipeline. Informational — used by
/// assembly/introspection layers outside this crate's scope, but kept here
/// since every stage must report one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageType {
    Source,
    Transform,
    Filter,
    Accumulate,
    Generate,
    Bidirectional,
}

pub type ElementReceiver = mpsc::Receiver<StreamElement>;
pub type ElementSender = mpsc::Sender<StreamElement>;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn stage_type(&self) -> StageType;

    /// Run the stage until `input` closes, an unrecoverable error occurs,
    /// or `cancel` fires. Must close `output` (drop it) on every exit path.
    async fn process(
        &self,
        cancel: &CancelToken,
        input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()>;
}

/// Send `elem` on `output`, returning `Error::Cancelled` if `cancel` fires
/// first and `Error::ChannelClosed` if the receiver was dropped. Every
/// stage in this crate routes its sends through this helper so the
/// cancellation contract in §4.1 is enforced in one place.
pub async fn send_cancellable(
    output: &ElementSender,
    elem: StreamElement,
    cancel: &CancelToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = output.send(elem) => res.map_err(|_| Error::ChannelClosed("output".into())),
    }
}

/// Receive from `input`, returning `None` when the channel is closed and
/// drained, or `Err(Error::Cancelled)` if `cancel` fires first.
pub async fn recv_cancellable(
    input: &mut ElementReceiver,
    cancel: &CancelToken,
) -> Result<Option<StreamElement>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        elem = input.recv() => Ok(elem),
    }
}

/// A stage that simply forwards every element unchanged. Useful both as a
/// wiring placeholder and as the base the `Debug` stage logs through.
pub struct PassThroughStage {
    name: String,
}

impl PassThroughStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PassThroughStage {
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
            match recv_cancellable(&mut input, cancel).await {
                Ok(Some(elem)) => send_cancellable(&output, elem, cancel).await?,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
