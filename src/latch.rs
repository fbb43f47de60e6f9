//! One-shot broadcast signal ("latch") used throughout the duplex bridge.
//!
//! Several bridge signals (input-done, all-responses-received, session
//! created) are idempotent, close-at-most-once broadcasts observed by
//! multiple waiters. `Latch` wraps a `tokio::sync::Notify` behind a single
//! `AtomicBool` guard so `close()` never double-fires and never blocks the
//! closer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Debug)]
pub struct Latch {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    closed: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Close the latch. Safe to call more than once; only the first call
    /// has any effect.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves immediately if already closed, otherwise waits for `close()`.
    pub async fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let notified = self.inner.notify.notified();
        // Re-check after registering interest to avoid the classic
        // notify-before-wait race.
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
