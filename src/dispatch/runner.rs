//! # Retry wrapper around one external action.
//!
//! [`dispatch`] runs an action until it succeeds, fails fatally, runs out of
//! tries, or is abandoned. It returns a derived token immediately and reports
//! the final outcome on a oneshot channel.
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► token cancelled?          → Canceled (TriggerAbandoned)
//!   ├─► AttemptStarting
//!   ├─► action(attempt token) [with optional timeout → TimeoutHit]
//!   │     ├─ Ok                   → TriggerSucceeded, done
//!   │     ├─ Canceled             → TriggerAbandoned, Canceled
//!   │     ├─ Fatal                → AttemptFailed, Fatal
//!   │     └─ Fail / Timeout       → AttemptFailed
//!   ├─► tries == max_tries?       → TriggerExhausted, Exhausted
//!   └─► BackoffScheduled → sleep (cancellable)
//! }
//! token.cancel(); results.send(outcome)
//! ```
//!
//! ## Rules
//! - Attempts never overlap; the next one starts after the previous returned.
//! - An attempt in flight is not aborted by cancellation; it gets a cancelled
//!   token and the loop stops at the next retry boundary.
//! - The derived token is cancelled exactly once, when the loop exits.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::error::{ActionError, DispatchError};
use crate::events::{Bus, Notice, NoticeKind};
use crate::model::Address;
use crate::scheduler::EventKind;

/// Labels attached to every notice of one dispatch.
#[derive(Clone, Debug)]
pub struct Origin {
    pub bus: Bus,
    pub trigger: EventKind,
    pub subject: Address,
}

impl Origin {
    pub fn new(bus: Bus, trigger: EventKind, subject: Address) -> Self {
        Self {
            bus,
            trigger,
            subject,
        }
    }

    fn publish(&self, notice: Notice) {
        self.bus
            .publish(notice.with_trigger(self.trigger).with_subject(self.subject));
    }
}

/// Starts retrying `action` under a token derived from `parent`.
///
/// Cancel the returned token to abandon the dispatch. The outcome is sent on
/// `results` after the token has been cancelled.
pub fn dispatch<F, Fut>(
    parent: &CancellationToken,
    policy: &RetryPolicy,
    origin: Origin,
    action: F,
    results: oneshot::Sender<Result<(), DispatchError>>,
) -> CancellationToken
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    let token = parent.child_token();
    let policy = *policy;
    let derived = token.clone();
    tokio::spawn(async move {
        let outcome = attempts(&token, &policy, &origin, action).await;
        token.cancel();
        let _ = results.send(outcome);
    });
    derived
}

async fn attempts<F, Fut>(
    token: &CancellationToken,
    policy: &RetryPolicy,
    origin: &Origin,
    mut action: F,
) -> Result<(), DispatchError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), ActionError>>,
{
    let max_tries = policy.max_tries.max(1);
    let mut tries: u32 = 0;
    loop {
        if token.is_cancelled() {
            return abandoned(origin, tries);
        }
        tries += 1;
        origin.publish(Notice::new(NoticeKind::AttemptStarting).with_attempt(tries));

        match attempt(&mut action, token, policy, origin, tries).await {
            Ok(()) => {
                origin.publish(Notice::new(NoticeKind::TriggerSucceeded).with_attempt(tries));
                return Ok(());
            }
            Err(ActionError::Canceled) => return abandoned(origin, tries),
            Err(error) if !error.is_retryable() => {
                warn!(trigger = %origin.trigger, subject = %origin.subject, tries, %error, "action failed fatally");
                origin.publish(failed(tries, &error));
                return Err(DispatchError::Fatal { tries, error });
            }
            Err(error) => {
                debug!(trigger = %origin.trigger, subject = %origin.subject, tries, %error, "attempt failed");
                origin.publish(failed(tries, &error));
                if tries >= max_tries {
                    warn!(trigger = %origin.trigger, subject = %origin.subject, tries, %error, "retries exhausted");
                    origin.publish(
                        Notice::new(NoticeKind::TriggerExhausted)
                            .with_attempt(tries)
                            .with_reason(error.to_string()),
                    );
                    return Err(DispatchError::Exhausted { tries, last: error });
                }

                let delay = policy.next(tries - 1);
                origin.publish(
                    Notice::new(NoticeKind::BackoffScheduled)
                        .with_attempt(tries)
                        .with_delay(delay)
                        .with_reason(error.to_string()),
                );
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = token.cancelled() => return abandoned(origin, tries),
                }
            }
        }
    }
}

/// Runs one attempt under a child of `token`, bounded by the policy timeout.
async fn attempt<F, Fut>(
    action: &mut F,
    token: &CancellationToken,
    policy: &RetryPolicy,
    origin: &Origin,
    tries: u32,
) -> Result<(), ActionError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), ActionError>>,
{
    let child = token.child_token();
    let Some(limit) = policy.timeout.filter(|d| !d.is_zero()) else {
        return action(child).await;
    };
    match time::timeout(limit, action(child.clone())).await {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            origin.publish(
                Notice::new(NoticeKind::TimeoutHit)
                    .with_attempt(tries)
                    .with_timeout(limit),
            );
            Err(ActionError::Timeout { timeout: limit })
        }
    }
}

fn failed(tries: u32, error: &ActionError) -> Notice {
    Notice::new(NoticeKind::AttemptFailed)
        .with_attempt(tries)
        .with_reason(error.to_string())
}

fn abandoned(origin: &Origin, tries: u32) -> Result<(), DispatchError> {
    debug!(trigger = %origin.trigger, subject = %origin.subject, tries, "dispatch abandoned");
    origin.publish(Notice::new(NoticeKind::TriggerAbandoned).with_attempt(tries));
    Err(DispatchError::Canceled)
}
