//! Cooperative cancellation root shared by every stage.
//!
//! Every blocking operation in this crate (channel send/receive, condition
//! waits, timers, external-session calls) selects on a `CancelToken`
//! alongside its own future. Built on a `tokio::sync::watch` channel rather
//! than a bespoke primitive, the same way the rest of the runtime signals
//! shutdown across tasks.

use tokio::sync::watch;

/// A cloneable, idempotent cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation to every clone of this token. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called on any clone.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; treat as never-cancels.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
