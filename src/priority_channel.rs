//! Bounded priority queue with blocking send/receive (§4.4).
//!
//! Four independent FIFO sub-queues, one per `Priority` level; capacity is
//! total across all four. `recv` always drains the highest non-empty
//! priority first and is FIFO within a priority. Built on
//! `parking_lot::Mutex` + `tokio::sync::Notify`, following the same
//! condition-variable-over-a-mutex shape the rest of the runtime uses for
//! its scheduler wait queues.

use crate::cancel::CancelToken;
use crate::element::{Priority, StreamElement};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

struct State {
    // Index 0 = Low .. 3 = Critical, matching `Priority`'s derived `Ord`.
    queues: [VecDeque<StreamElement>; 4],
    capacity: usize,
    closed: bool,
}

impl State {
    fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    fn pop_highest(&mut self) -> Option<StreamElement> {
        for queue in self.queues.iter_mut().rev() {
            if let Some(elem) = queue.pop_front() {
                return Some(elem);
            }
        }
        None
    }

    fn push(&mut self, elem: StreamElement) {
        self.queues[priority_index(elem.priority)].push_back(elem);
    }
}

fn priority_index(p: Priority) -> usize {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

struct Shared {
    state: Mutex<State>,
    not_empty: Notify,
    not_full: Notify,
}

/// A bounded, priority-ordered channel.
#[derive(Clone)]
pub struct PriorityChannel {
    inner: Arc<Shared>,
}

impl PriorityChannel {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "priority channel capacity must be > 0".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State {
                    queues: Default::default(),
                    capacity,
                    closed: false,
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        })
    }

    /// Blocks while `len() >= capacity` and the channel is open. Returns
    /// `Error::ChannelClosed` if the channel was closed, `Error::Cancelled`
    /// if `cancel` fired first.
    pub async fn send(&self, elem: StreamElement, cancel: &CancelToken) -> Result<()> {
        loop {
            let notified = self.inner.not_full.notified();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::ChannelClosed("priority channel closed".into()));
                }
                if state.len() < state.capacity {
                    state.push(elem);
                    drop(state);
                    self.inner.not_empty.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Blocks while empty and open. Returns `Ok(None)` once closed and
    /// drained, `Error::Cancelled` if `cancel` fires first.
    pub async fn recv(&self, cancel: &CancelToken) -> Result<Option<StreamElement>> {
        loop {
            let notified = self.inner.not_empty.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(elem) = state.pop_highest() {
                    drop(state);
                    self.inner.not_full.notify_one();
                    return Ok(Some(elem));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Idempotent. Releases every waiter on both sides.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
