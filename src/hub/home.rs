//! # SubHome: single-owner fan-out register.
//!
//! Holds the live subscriptions of one hub, keyed by an incrementing id. It is
//! plain data: the owning actor is the only caller, so no locks are involved.
//!
//! ## Rules
//! - Each subscription has a predicate; `broadcast` skips non-matching entries.
//! - Every entry's close signal fires **exactly once** (delete, close or prune).
//! - The close signal is sent *before* the value sender is dropped, so a reader
//!   that sees the end of the value stream always finds the signal waiting.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::actor::Request;
use super::subscription::Subscription;
use crate::error::HubError;

/// Subscription predicate.
pub type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Entry<T> {
    filter: Filter<T>,
    tx: mpsc::Sender<T>,
    done: oneshot::Sender<Result<(), HubError>>,
}

impl<T> Entry<T> {
    fn signal(self, result: Result<(), HubError>) {
        let _ = self.done.send(result);
    }
}

/// Registry of live subscriptions owned by one hub actor.
pub(crate) struct SubHome<T> {
    next_id: u64,
    subs: HashMap<u64, Entry<T>>,
    buffer: usize,
}

impl<T: Clone + Send + Sync + 'static> SubHome<T> {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            next_id: 0,
            subs: HashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    /// Registers a subscription and preloads the matching `replay` values.
    ///
    /// The buffer is sized `replay + buffer`, so preloading never blocks.
    pub(crate) fn subscribe(
        &mut self,
        filter: Filter<T>,
        replay: &[T],
        home: mpsc::WeakSender<Request<T>>,
    ) -> Subscription<T> {
        let preload: Vec<&T> = replay.iter().filter(|v| filter(v)).collect();
        let replayed = preload.len();
        let (tx, rx) = mpsc::channel(replayed + self.buffer);
        for v in preload {
            let _ = tx.try_send(v.clone());
        }
        let (done_tx, done_rx) = oneshot::channel();

        let id = self.next_id;
        self.next_id += 1;
        self.subs.insert(
            id,
            Entry {
                filter,
                tx,
                done: done_tx,
            },
        );
        Subscription::new(id, rx, done_rx, home, replayed)
    }

    /// Delivers `value` to every matching subscription.
    ///
    /// Each buffer write races `shutdown`; returns `false` if shutdown won.
    /// Subscriptions whose reader is gone are pruned.
    pub(crate) async fn broadcast(&mut self, value: &T, shutdown: &CancellationToken) -> bool {
        let mut dead = Vec::new();
        for (id, entry) in &self.subs {
            if !(entry.filter)(value) {
                continue;
            }
            tokio::select! {
                res = entry.tx.send(value.clone()) => {
                    if res.is_err() {
                        dead.push(*id);
                    }
                }
                _ = shutdown.cancelled() => return false,
            }
        }
        for id in dead {
            self.delete(id);
        }
        true
    }

    /// Removes one subscription with a clean close signal.
    pub(crate) fn delete(&mut self, id: u64) -> bool {
        match self.subs.remove(&id) {
            Some(entry) => {
                entry.signal(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Signals every live subscription with `result` and clears the registry.
    pub(crate) fn close(&mut self, result: Result<(), HubError>) {
        for (_, entry) in self.subs.drain() {
            entry.signal(result.clone());
        }
    }
}
