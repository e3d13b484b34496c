//! # Slot clock: the time base of every scheduler.
//!
//! The node feed pushes slot numbers through [`SlotClock::advance`]. A forwarder
//! task republishes them on a `Retain::Latest` hub, so a new subscriber always
//! starts from the current slot.
//!
//! ## Rules
//! - Forwarded slots are strictly increasing; a regression or repeat is dropped.
//! - Gaps are forwarded as-is; consumers compare against thresholds, never count ticks.
//! - Consumers may only subscribe; only the owner of the clock advances it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::HubError;
use crate::hub::{Hub, Retain, Subscription};

/// Monotonic slot broadcaster.
#[derive(Clone, Debug)]
pub struct SlotClock {
    tx: mpsc::Sender<u64>,
    hub: Hub<u64>,
}

impl SlotClock {
    /// Spawns the clock forwarder and its hub.
    pub fn spawn(buffer: usize, parent: &CancellationToken) -> Self {
        let hub = Hub::spawn(Retain::Latest, buffer, parent);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(forward(rx, hub.clone(), parent.child_token()));
        Self { tx, hub }
    }

    /// Offers a new slot; it is published only if newer than the last one.
    pub async fn advance(&self, slot: u64) -> Result<(), HubError> {
        self.tx.send(slot).await.map_err(|_| HubError::Closed)
    }

    /// Subscribes to the slot stream, starting with the current slot if known.
    pub async fn subscribe(&self) -> Result<Subscription<u64>, HubError> {
        self.hub.subscribe().await
    }

    /// Number of live slot subscriptions.
    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        self.hub.subscriber_count().await
    }
}

async fn forward(mut rx: mpsc::Receiver<u64>, hub: Hub<u64>, token: CancellationToken) {
    let mut last: Option<u64> = None;
    loop {
        let slot = tokio::select! {
            _ = token.cancelled() => break,
            slot = rx.recv() => match slot {
                Some(slot) => slot,
                None => break,
            },
        };
        if last.is_some_and(|l| slot <= l) {
            debug!(slot, last = ?last, "dropping non-increasing slot");
            continue;
        }
        last = Some(slot);
        if hub.broadcast(slot).await.is_err() {
            break;
        }
    }
    hub.close().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn regressions_dropped_gaps_kept() {
        let root = CancellationToken::new();
        let clock = SlotClock::spawn(8, &root);
        let mut sub = clock.subscribe().await.unwrap();

        for slot in [10, 12, 11, 12, 20] {
            clock.advance(slot).await.unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let slot = timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push(slot);
        }
        assert_eq!(seen, vec![10, 12, 20]);
    }

    #[tokio::test]
    async fn late_subscriber_starts_at_current_slot() {
        let root = CancellationToken::new();
        let clock = SlotClock::spawn(8, &root);
        clock.advance(5).await.unwrap();
        clock.advance(6).await.unwrap();

        // Wait until 6 has been forwarded.
        let mut first = clock.subscribe().await.unwrap();
        loop {
            let slot = timeout(Duration::from_secs(5), first.recv())
                .await
                .unwrap()
                .unwrap();
            if slot == Some(6) {
                break;
            }
        }

        let mut late = clock.subscribe().await.unwrap();
        assert_eq!(late.recv().await.unwrap(), Some(6));
    }
}
