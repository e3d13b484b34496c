//! # LogWriter: renders runtime notices through `tracing`.
//!
//! Failures log at `warn`, lifecycle at `info`, per-attempt chatter at `debug`.
//!
//! ```text
//! INFO  object created subject=ab12.. object=payout
//! DEBUG backoff scheduled subject=ab12.. trigger=trigger_crank attempt=2 delay_ms=1000
//! WARN  trigger exhausted subject=ab12.. trigger=trigger_close_bids attempt=5 reason=..
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Observe;
use crate::events::{Notice, NoticeKind};

/// Built-in observer writing every notice to the `tracing` pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Observe for LogWriter {
    async fn on_notice(&self, n: &Notice) {
        let subject = n.subject.map(|a| a.to_string());
        let object = n.object.map(|k| k.to_string());
        let trigger = n.trigger.map(|k| k.as_label());
        let reason = n.reason.as_deref();
        match n.kind {
            NoticeKind::ObjectCreated => info!(?subject, ?object, "object created"),
            NoticeKind::ObjectDeleted => info!(?subject, ?object, "object deleted"),
            NoticeKind::ForwardQueued => debug!(?subject, ?object, ?reason, "update parked"),
            NoticeKind::ForwardReplayed => debug!(?subject, ?object, "parked update replayed"),
            NoticeKind::RouterFailed => warn!(?reason, "router failed"),
            NoticeKind::SchedulerStarted => info!(?subject, ?object, "scheduler started"),
            NoticeKind::SchedulerStopped => info!(?subject, ?object, "scheduler stopped"),
            NoticeKind::SchedulerFailed => warn!(?subject, ?object, ?reason, "scheduler failed"),
            NoticeKind::TriggerEmitted => info!(?subject, ?trigger, "trigger emitted"),
            NoticeKind::AttemptStarting => {
                debug!(?subject, ?trigger, attempt = ?n.attempt, "attempt starting")
            }
            NoticeKind::AttemptFailed => {
                debug!(?subject, ?trigger, attempt = ?n.attempt, ?reason, "attempt failed")
            }
            NoticeKind::TimeoutHit => {
                debug!(?subject, ?trigger, attempt = ?n.attempt, timeout_ms = ?n.timeout_ms, "attempt timed out")
            }
            NoticeKind::BackoffScheduled => {
                debug!(?subject, ?trigger, attempt = ?n.attempt, delay_ms = ?n.delay_ms, "backoff scheduled")
            }
            NoticeKind::TriggerSucceeded => {
                info!(?subject, ?trigger, attempt = ?n.attempt, "trigger succeeded")
            }
            NoticeKind::TriggerAbandoned => debug!(?subject, ?trigger, "trigger abandoned"),
            NoticeKind::TriggerExhausted => {
                warn!(?subject, ?trigger, attempt = ?n.attempt, ?reason, "trigger exhausted")
            }
            NoticeKind::ShutdownRequested => info!("shutdown requested"),
            NoticeKind::AllStoppedWithin => info!("all schedulers stopped within grace"),
            NoticeKind::GraceExceeded => warn!(?reason, "grace period exceeded"),
            NoticeKind::ObserverOverflow => warn!(?reason, "observer overflow"),
            NoticeKind::ObserverPanicked => warn!(?reason, "observer panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
