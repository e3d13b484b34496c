//! # Notice bus for broadcasting runtime notices.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so that the router, every scheduler
//! and every dispatcher can publish without blocking.
//!
//! ```text
//! Publishers (many):                 Listener (one):
//!   Router      ──┐
//!   Scheduler N ──┼──────► Bus ───────► engine listener ────► ObserverSet
//!   dispatch()  ──┘  (broadcast chan)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent notices for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: notices are lost if there are no active subscribers at send time.
//!
//! ## Capacity behavior
//! When the channel reaches capacity and new notices are sent:
//! - The ring buffer keeps only the most recent `capacity` notices.
//! - Receivers that fell behind observe `RecvError::Lagged(n)` on the next `recv()`,
//!   indicating how many notices were skipped.

use tokio::sync::broadcast;

use super::notice::Notice;

/// Broadcast channel for runtime notices.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately (send clones internally).
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Notice>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    ///
    /// ### Notes
    /// - Capacity is **shared** across all receivers (not per-subscriber).
    /// - When receivers lag, they will observe `RecvError::Lagged`.
    /// - The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Notice>(capacity);
        Self { tx }
    }

    /// Publishes a notice to all active subscribers.
    ///
    /// - Takes ownership of the notice; the broadcast channel clones it for each receiver.
    /// - If there are no receivers, the notice is dropped (this function still returns immediately).
    pub fn publish(&self, n: Notice) {
        let _ = self.tx.send(n);
    }

    /// Creates a new receiver that will observe subsequent notices.
    ///
    /// - Each call creates an **independent** receiver.
    /// - A receiver only gets notices **sent after** it subscribes.
    /// - Slow receivers get `RecvError::Lagged(n)` and skip over missed items.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoticeKind;

    #[tokio::test]
    async fn receivers_see_notices_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Notice::new(NoticeKind::ObjectCreated));
        let mut rx = bus.subscribe();
        bus.publish(Notice::new(NoticeKind::ObjectDeleted));
        assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::ObjectDeleted);
    }
}
