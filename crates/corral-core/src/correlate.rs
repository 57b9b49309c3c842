//! Keyed single-fulfillment operation registry
//!
//! Converts the one-to-many event stream into one-shot futures: a workflow
//! operation registers under a correlation key before issuing its command,
//! and the event dispatch path resolves the oldest live registration for that
//! key with the event's outcome. Each registration resolves at most once; the
//! oneshot sender is consumed by the send, so a duplicate or stale event can
//! never reach a caller twice.
//!
//! Registrations for one key queue in FIFO order. There are no timeouts: a
//! registration whose matching event never arrives pends until its caller
//! gives up and drops the receiving half, which `resolve` detects and skips.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tokio::sync::{oneshot, Mutex};
use tracing::trace;

use crate::error::{CorralError, Result};

// ----------------------------------------------------------------------------
// Pending Operation
// ----------------------------------------------------------------------------

/// The awaitable half of a registered operation.
///
/// Created by [`Correlator::register`], consumed by [`PendingOperation::wait`].
/// Never reused.
#[derive(Debug)]
pub struct PendingOperation<V> {
    rx: oneshot::Receiver<Result<V>>,
}

impl<V> PendingOperation<V> {
    /// Suspend the calling task until a matching event resolves this
    /// operation. Only this caller is woken; concurrent registrations with
    /// other keys are unaffected.
    pub async fn wait(self) -> Result<V> {
        self.rx.await.map_err(|_| CorralError::ChannelClosed)?
    }
}

// ----------------------------------------------------------------------------
// Correlator
// ----------------------------------------------------------------------------

/// Single-fulfillment promise registry keyed by a correlation key.
///
/// `register` and `resolve` may run on different tasks concurrently; the
/// pending set is guarded by a mutex that is never held across an await
/// point.
#[derive(Debug)]
pub struct Correlator<K, V> {
    pending: Mutex<HashMap<K, VecDeque<oneshot::Sender<Result<V>>>>>,
}

impl<K, V> Correlator<K, V>
where
    K: Eq + Hash + Clone + core::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending operation under `key`.
    ///
    /// Call this before issuing the backend command so the outcome event
    /// cannot race ahead of the registration.
    pub async fn register(&self, key: K) -> PendingOperation<V> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .entry(key)
            .or_default()
            .push_back(tx);
        PendingOperation { rx }
    }

    /// Resolve the oldest live registration for `key` with `outcome`.
    ///
    /// Registrations whose caller already dropped the pending half are
    /// discarded in passing. Returns `None` when a waiter consumed the
    /// outcome, or hands the outcome back when nothing matched so the caller
    /// can route it elsewhere or drop it.
    pub async fn resolve(&self, key: &K, outcome: Result<V>) -> Option<Result<V>> {
        let mut pending = self.pending.lock().await;
        let Some(queue) = pending.get_mut(key) else {
            return Some(outcome);
        };

        let mut outcome = outcome;
        let unmatched = loop {
            match queue.pop_front() {
                None => break Some(outcome),
                Some(tx) => match tx.send(outcome) {
                    Ok(()) => break None,
                    // Caller went away before the event arrived.
                    Err(unsent) => {
                        trace!(?key, "skipping abandoned registration");
                        outcome = unsent;
                    }
                },
            }
        };
        if queue.is_empty() {
            pending.remove(key);
        }
        unmatched
    }

    /// Number of live registrations under `key`.
    pub async fn pending_for(&self, key: &K) -> usize {
        self.pending
            .lock()
            .await
            .get(key)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

impl<K, V> Default for Correlator<K, V>
where
    K: Eq + Hash + Clone + core::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
