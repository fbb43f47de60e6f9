//! Router framework and the six routing policies (§4.2).
//!
//! Routers diverge from the common `Stage` contract: they dispatch sideways
//! into a named-output table rather than a single `output` channel (see
//! REDESIGN FLAGS — the generic `Stage::process` output parameter would
//! otherwise sit unused and never written). `OutputTable` is the shared
//! piece every variant below embeds.

mod broadcast;
mod content;
mod hash;
mod random;
mod round_robin;
mod weighted;

pub use broadcast::BroadcastRouter;
pub use content::{
    audio_present_with_encoding, content_type_equals, match_all, text_present, ContentRouter,
    Predicate,
};
pub use hash::{key_from_metadata, key_from_source, HashRouter, KeyExtractor};
pub use random::RandomRouter;
pub use round_robin::RoundRobinRouter;
pub use weighted::WeightedRouter;

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use crate::stage::ElementSender;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Registered (name, sender) pairs, in registration order. Registration
/// happens before `process` starts; the lock is only ever taken for reads
/// during `process` itself, per §5's locking discipline.
pub struct OutputTable {
    outputs: RwLock<Vec<(String, ElementSender)>>,
}

impl OutputTable {
    pub fn new() -> Self {
        Self {
            outputs: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.write().push((name.into(), sender));
    }

    pub fn names(&self) -> Vec<String> {
        self.outputs.read().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<ElementSender> {
        self.outputs
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    pub fn get_by_index(&self, index: usize) -> Option<(String, ElementSender)> {
        self.outputs.read().get(index).cloned()
    }

    pub fn all(&self) -> Vec<(String, ElementSender)> {
        self.outputs.read().clone()
    }

    /// Drop every registered sender exactly once. Idempotent: a second call
    /// finds an empty table and does nothing.
    pub fn close_all(&self) {
        self.outputs.write().clear();
    }
}

impl Default for OutputTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `elem` to `sender`, selecting on `cancel`. Every router routes its
/// sideways sends through this helper.
pub async fn send_to_output(
    sender: &ElementSender,
    elem: StreamElement,
    cancel: &CancelToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = sender.send(elem) => res.map_err(|_| Error::ChannelClosed("router output".into())),
    }
}

/// The narrower contract routers implement instead of `Stage`: one input,
/// many named outputs, no generic `output` channel. Output registration is
/// not part of this trait — it happens on the concrete router type, before
/// it is ever boxed as `dyn Router`, since `register_output` takes
/// `impl Into<String>` and generic methods aren't object-safe.
#[async_trait]
pub trait Router: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `input` closes, an unrecoverable error occurs, or `cancel`
    /// fires. Must close every registered output exactly once on every exit
    /// path.
    async fn process(
        &self,
        cancel: &CancelToken,
        input: crate::stage::ElementReceiver,
    ) -> Result<()>;
}
