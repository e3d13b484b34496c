//! # ObserverSet: non-blocking fan-out of notices.
//!
//! ```text
//!    emit(&Notice)
//!        │                   (Arc per notice)
//!        ├──────────► [queue O1] ─► worker O1 ─► on_notice()
//!        └──────────► [queue ON] ─► worker ON ─► on_notice()
//! ```
//!
//! ## Rules
//! - `emit` never waits; a full queue drops the notice for that observer.
//! - Per-observer FIFO; no ordering across observers.
//! - A panicking observer keeps running with the next notice.
//! - Overflow and panic reports are published on the bus, but a report is
//!   never itself reported as overflow.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

use super::Observe;
use crate::events::{Bus, Notice};

struct Channel {
    name: &'static str,
    tx: mpsc::Sender<Arc<Notice>>,
}

/// Observers with one bounded queue and worker each.
pub struct ObserverSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl ObserverSet {
    /// Spawns one worker per observer.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for obs in observers {
            let name = obs.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Notice>>(obs.queue_capacity().max(1));
            let bus = bus.clone();
            workers.push(tokio::spawn(async move {
                while let Some(n) = rx.recv().await {
                    let fut = obs.on_notice(n.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(panic.as_ref());
                        warn!(observer = name, panic = %info, "observer panicked");
                        bus.publish(Notice::observer_panicked(name, info));
                    }
                }
            }));
            channels.push(Channel { name, tx });
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Queues `notice` for every observer without waiting.
    pub fn emit(&self, notice: &Notice) {
        let n = Arc::new(notice.clone());
        for ch in &self.channels {
            let reason = match ch.tx.try_send(Arc::clone(&n)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            warn!(observer = ch.name, reason, seq = notice.seq, "observer dropped notice");
            if !notice.is_observer_report() {
                self.bus.publish(Notice::observer_overflow(ch.name, reason));
            }
        }
    }

    /// Feeds every notice from `rx` into the set until the bus closes.
    ///
    /// Lagging behind the bus skips the lost notices with a warning.
    pub fn spawn_listener(self, mut rx: broadcast::Receiver<Notice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(n) => self.emit(&n),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "observer listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            self.shutdown().await;
        })
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for w in self.workers {
            let _ = w.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    use super::*;
    use crate::events::NoticeKind;

    struct Recorder(Arc<Mutex<Vec<NoticeKind>>>);

    #[async_trait]
    impl Observe for Recorder {
        async fn on_notice(&self, n: &Notice) {
            self.0.lock().await.push(n.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panics;

    #[async_trait]
    impl Observe for Panics {
        async fn on_notice(&self, n: &Notice) {
            if n.kind == NoticeKind::ObjectCreated {
                panic!("boom");
            }
        }

        fn name(&self) -> &'static str {
            "panics"
        }
    }

    /// Never drains its queue of one.
    struct Stuck;

    #[async_trait]
    impl Observe for Stuck {
        async fn on_notice(&self, _n: &Notice) {
            std::future::pending::<()>().await;
        }

        fn name(&self) -> &'static str {
            "stuck"
        }

        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn panicking_observer_is_isolated() {
        let bus = Bus::new(16);
        let mut reports = bus.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ObserverSet::new(
            vec![Arc::new(Panics), Arc::new(Recorder(seen.clone()))],
            bus.clone(),
        );

        set.emit(&Notice::new(NoticeKind::ObjectCreated));
        set.emit(&Notice::new(NoticeKind::ObjectDeleted));
        set.shutdown().await;

        assert_eq!(
            *seen.lock().await,
            vec![NoticeKind::ObjectCreated, NoticeKind::ObjectDeleted]
        );
        let report = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
        assert_eq!(report.kind, NoticeKind::ObserverPanicked);
        assert!(report.reason.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn full_queue_drops_and_reports_once() {
        let bus = Bus::new(16);
        let mut reports = bus.subscribe();
        let set = ObserverSet::new(vec![Arc::new(Stuck)], bus.clone());

        // One in the worker, one queued, the rest overflow.
        for _ in 0..4 {
            set.emit(&Notice::new(NoticeKind::SchedulerStarted));
            tokio::task::yield_now().await;
        }
        let n = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
        assert_eq!(n.kind, NoticeKind::ObserverOverflow);

        // Overflow of a report is not reported again.
        let before = reports.len();
        set.emit(&Notice::observer_overflow("other", "full"));
        assert_eq!(reports.len(), before);
    }
}
