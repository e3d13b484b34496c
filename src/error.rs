//! Error types used by the synchronization engine.
//!
//! - [`HubError`]: close signal of a broadcast hub subscription.
//! - [`RouterError`]: protocol/decode failures (fatal) and lookups (not fatal).
//! - [`ActionError`]: one failed attempt of an external action.
//! - [`DispatchError`]: terminal outcome of a retried trigger.
//! - [`SchedulerError`]: why a scheduler terminated abnormally.
//! - [`RuntimeError`]: engine-level failures (shutdown, config, router death).
//!
//! Every enum exposes `as_label()` with a stable snake_case label for logs.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::model::{Address, Kind};
use crate::scheduler::EventKind;

/// # Non-clean close signal of a hub subscription.
///
/// A clean close is reported as `Ok(None)` by
/// [`Subscription::recv`](crate::hub::Subscription::recv); this type is the non-nil case.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub actor is gone; the request could not be delivered.
    #[error("hub closed")]
    Closed,

    /// The owner terminated the hub with an error.
    #[error("hub terminated: {reason}")]
    Terminated {
        /// Owner-supplied reason.
        reason: Arc<str>,
    },
}

impl HubError {
    pub fn terminated(reason: impl Into<Arc<str>>) -> Self {
        HubError::Terminated {
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            HubError::Closed => "hub_closed",
            HubError::Terminated { .. } => "hub_terminated",
        }
    }
}

/// # Errors produced by the router.
///
/// `Decode` and `KindMismatch` indicate a protocol mismatch and are fatal to the
/// router actor. `NotFound` is returned synchronously to lookup callers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Malformed account payload.
    #[error("malformed account {address}: {reason}")]
    Decode {
        address: Address,
        reason: String,
    },

    /// The same address was observed as two different account kinds.
    #[error("account {address} is a {expected}, got a {found} update")]
    KindMismatch {
        address: Address,
        expected: Kind,
        found: Kind,
    },

    /// No live object of that kind at that address.
    #[error("no {kind} at {address}")]
    NotFound { kind: Kind, address: Address },

    /// The router actor is no longer running.
    #[error("router closed")]
    Closed,
}

impl RouterError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RouterError::Decode { .. } => "router_decode",
            RouterError::KindMismatch { .. } => "router_kind_mismatch",
            RouterError::NotFound { .. } => "router_not_found",
            RouterError::Closed => "router_closed",
        }
    }

    /// Whether the router actor must stop after observing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RouterError::Decode { .. } | RouterError::KindMismatch { .. }
        )
    }
}

/// # Errors produced by one attempt of an external action.
///
/// `Fail` and `Timeout` are retried; `Fatal` stops the dispatch loop at once.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Attempt exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Non-recoverable error (never retried).
    #[error("fatal error (no retry): {error}")]
    Fatal { error: String },

    /// Submission rejected; may succeed on retry.
    #[error("execution failed: {error}")]
    Fail { error: String },

    /// Attempt observed cancellation of its trigger.
    #[error("trigger cancelled")]
    Canceled,
}

impl ActionError {
    pub fn fail(error: impl Into<String>) -> Self {
        ActionError::Fail {
            error: error.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Timeout { .. } => "action_timeout",
            ActionError::Fatal { .. } => "action_fatal",
            ActionError::Fail { .. } => "action_failed",
            ActionError::Canceled => "action_canceled",
        }
    }

    /// Returns `true` for [`ActionError::Fail`] and [`ActionError::Timeout`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Fail { .. } | ActionError::Timeout { .. })
    }
}

/// # Terminal outcome of a dispatched trigger.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Every attempt failed.
    #[error("gave up after {tries} tries: {last}")]
    Exhausted { tries: u32, last: ActionError },

    /// The action reported a fatal error.
    #[error("fatal after {tries} tries: {error}")]
    Fatal { tries: u32, error: ActionError },

    /// The trigger went stale; treated as success by irrelevance.
    #[error("trigger abandoned")]
    Canceled,
}

impl DispatchError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Exhausted { .. } => "dispatch_exhausted",
            DispatchError::Fatal { .. } => "dispatch_fatal",
            DispatchError::Canceled => "dispatch_canceled",
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, DispatchError::Canceled)
    }
}

/// # Why a scheduler terminated abnormally.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A trigger's dispatch gave up.
    #[error("{kind:?} failed: {error}")]
    TriggerFailed { kind: EventKind, error: DispatchError },

    /// An input hub closed with an error.
    #[error("input closed: {0}")]
    Source(#[from] HubError),

    /// A referenced object could not be resolved.
    #[error("lookup failed: {0}")]
    Lookup(#[from] RouterError),
}

impl SchedulerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::TriggerFailed { .. } => "scheduler_trigger_failed",
            SchedulerError::Source(_) => "scheduler_source",
            SchedulerError::Lookup(_) => "scheduler_lookup",
        }
    }
}

/// # Errors produced by the engine runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; listed schedulers did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded { grace: Duration, stuck: Vec<String> },

    /// The router hit a fatal protocol error; the whole engine must be restarted.
    #[error("router failed: {0}")]
    Router(#[from] RouterError),

    /// A router hub closed while the engine was starting.
    #[error("startup failed: {0}")]
    Hub(#[from] HubError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Router(_) => "runtime_router",
            RuntimeError::Hub(_) => "runtime_hub",
            RuntimeError::Config(_) => "runtime_config",
            RuntimeError::Io(_) => "runtime_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_action_errors() {
        assert!(ActionError::fail("rejected").is_retryable());
        assert!(
            ActionError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(
            !ActionError::Fatal {
                error: "bad".into()
            }
            .is_retryable()
        );
        assert!(!ActionError::Canceled.is_retryable());
    }

    #[test]
    fn router_fatality() {
        let a = Address::repeat(1);
        assert!(
            RouterError::Decode {
                address: a,
                reason: "x".into()
            }
            .is_fatal()
        );
        assert!(
            !RouterError::NotFound {
                kind: Kind::Payout,
                address: a
            }
            .is_fatal()
        );
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(DispatchError::Canceled.as_label(), "dispatch_canceled");
        assert_eq!(HubError::terminated("x").as_label(), "hub_terminated");
        let err = RuntimeError::GraceExceeded {
            grace: Duration::from_secs(5),
            stuck: vec![],
        };
        assert_eq!(err.as_label(), "runtime_grace_exceeded");
    }
}
