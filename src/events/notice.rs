//! # Runtime notices emitted by the router, schedulers and dispatchers.
//!
//! [`NoticeKind`] classifies what happened; [`Notice`] carries the metadata
//! (subject address, trigger kind, attempt, delays, reason).
//!
//! Notices are for observability only: nothing in the engine reacts to them.
//! Scheduler lifecycle history lives in the scheduler event logs instead.
//!
//! ## Ordering guarantees
//! Each notice has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when notices are delivered out of order.
//!
//! ## Example
//! ```rust
//! use pipesync::events::{Notice, NoticeKind};
//! use pipesync::model::Address;
//!
//! let n = Notice::new(NoticeKind::AttemptFailed)
//!     .with_subject(Address::repeat(1))
//!     .with_reason("rejected")
//!     .with_attempt(3);
//!
//! assert_eq!(n.kind, NoticeKind::AttemptFailed);
//! assert_eq!(n.attempt, Some(3));
//! assert_eq!(n.reason.as_deref(), Some("rejected"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::model::{Address, Kind};
use crate::scheduler::EventKind;

static NOTICE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    // === Router ===
    /// An object actor was created. Sets `subject`, `object`.
    ObjectCreated,
    /// An object was removed from the router maps. Sets `subject`, `object`.
    ObjectDeleted,
    /// An update was parked until its parent exists.
    ///
    /// Sets:
    /// - `subject`: address of the queued account
    /// - `object`: kind of the queued account
    /// - `reason`: missing parent
    ForwardQueued,
    /// A parked update was replayed after its parent appeared. Sets `subject`, `object`.
    ForwardReplayed,
    /// The router stopped on a protocol error. Sets `reason`.
    RouterFailed,

    // === Schedulers ===
    /// Sets `subject`, `object`.
    SchedulerStarted,
    /// Scheduler finished its lifecycle or was cancelled. Sets `subject`, `object`.
    SchedulerStopped,
    /// Scheduler terminated with an error. Sets `subject`, `object`, `reason`.
    SchedulerFailed,
    /// A trigger event was emitted. Sets `subject`, `trigger`.
    TriggerEmitted,

    // === Dispatch ===
    /// Sets `subject`, `trigger`, `attempt`.
    AttemptStarting,
    /// Sets `subject`, `trigger`, `attempt`, `reason`.
    AttemptFailed,
    /// Attempt exceeded its timeout. Sets `subject`, `trigger`, `attempt`, `timeout_ms`.
    TimeoutHit,
    /// Next attempt scheduled. Sets `subject`, `trigger`, `attempt`, `delay_ms`, `reason`.
    BackoffScheduled,
    /// Sets `subject`, `trigger`, `attempt`.
    TriggerSucceeded,
    /// The trigger went stale before it succeeded. Sets `subject`, `trigger`.
    TriggerAbandoned,
    /// Dispatch gave up. Sets `subject`, `trigger`, `attempt`, `reason`.
    TriggerExhausted,

    // === Shutdown ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,
    /// Every scheduler stopped within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded. Sets `reason` (stuck schedulers).
    GraceExceeded,

    // === Observers ===
    /// Observer dropped a notice (queue full or worker closed). Sets `reason`.
    ObserverOverflow,
    /// Observer panicked while handling a notice. Sets `reason`.
    ObserverPanicked,
}

/// Runtime notice with optional metadata.
#[derive(Clone, Debug)]
pub struct Notice {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: NoticeKind,

    /// Address of the account, object or scheduler concerned.
    pub subject: Option<Address>,
    /// Kind of the object concerned.
    pub object: Option<Kind>,
    /// Scheduler event kind of the trigger concerned.
    pub trigger: Option<EventKind>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Attempt timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Notice {
    /// Creates a notice of the given kind with current timestamp and next sequence number.
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            seq: NOTICE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subject: None,
            object: None,
            trigger: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_subject(mut self, address: Address) -> Self {
        self.subject = Some(address);
        self
    }

    #[inline]
    pub fn with_object(mut self, kind: Kind) -> Self {
        self.object = Some(kind);
        self
    }

    #[inline]
    pub fn with_trigger(mut self, kind: EventKind) -> Self {
        self.trigger = Some(kind);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an attempt timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Creates an observer overflow notice.
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        Notice::new(NoticeKind::ObserverOverflow)
            .with_reason(format!("observer={observer} reason={reason}"))
    }

    /// Creates an observer panic notice.
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        Notice::new(NoticeKind::ObserverPanicked)
            .with_reason(format!("observer={observer} panic={info}"))
    }

    #[inline]
    pub fn is_observer_report(&self) -> bool {
        matches!(
            self.kind,
            NoticeKind::ObserverOverflow | NoticeKind::ObserverPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Notice::new(NoticeKind::ObjectCreated);
        let b = Notice::new(NoticeKind::ObjectDeleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn long_delays_saturate() {
        let n = Notice::new(NoticeKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(n.delay_ms, Some(u32::MAX));
    }
}
