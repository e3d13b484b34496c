//! # Trigger dispatcher: turns scheduler triggers into executed actions.
//!
//! One dispatcher follows one scheduler's history. Every trigger that is
//! still live when read is dispatched under its own token, so the scheduler
//! abandons it by cancelling the trigger. The final outcome goes back to the
//! scheduler through [`Trigger::report`].
//!
//! ```text
//! scheduler history ──► TriggerDispatcher ──► dispatch(trigger.token) ──► Executor
//!        ▲                                            │
//!        └──────────────── Trigger::report ◄──────────┘
//! ```

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::action::{ActionRequest, ExecutorRef};
use super::retry::RetryPolicy;
use super::runner::{Origin, dispatch};
use crate::error::DispatchError;
use crate::events::Bus;
use crate::hub::Subscription;
use crate::scheduler::{Event, Trigger};

/// Dispatches the triggers of one scheduler.
#[derive(Clone)]
pub struct TriggerDispatcher {
    executor: ExecutorRef,
    policy: RetryPolicy,
    bus: Bus,
}

impl TriggerDispatcher {
    pub fn new(executor: ExecutorRef, policy: RetryPolicy, bus: Bus) -> Self {
        Self {
            executor,
            policy,
            bus,
        }
    }

    /// Follows `events` until the history ends or `parent` is cancelled.
    pub fn spawn(&self, mut events: Subscription<Event>, parent: &CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let token = parent.child_token();
        tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = token.cancelled() => break,
                    ev = events.recv() => match ev {
                        Ok(Some(ev)) => ev,
                        Ok(None) | Err(_) => break,
                    },
                };
                let Some(trigger) = ev.trigger else {
                    continue;
                };
                if trigger.is_stale() {
                    debug!(kind = %trigger.kind(), id = trigger.id(), "skipping stale trigger");
                    continue;
                }
                this.launch(ev.slot, trigger);
            }
        })
    }

    fn launch(&self, slot: u64, trigger: Trigger) {
        let req = ActionRequest {
            kind: trigger.kind(),
            subject: trigger.subject(),
            slot,
        };
        let executor = self.executor.clone();
        let origin = Origin::new(self.bus.clone(), req.kind, req.subject);
        let (tx, rx) = oneshot::channel();
        dispatch(
            trigger.token(),
            &self.policy,
            origin,
            move |ctx| {
                let executor = executor.clone();
                async move { executor.execute(&req, ctx).await }
            },
            tx,
        );
        tokio::spawn(async move {
            let result = rx.await.unwrap_or(Err(DispatchError::Canceled));
            if !trigger.report(result).await {
                debug!(kind = %trigger.kind(), id = trigger.id(), "scheduler gone before report");
            }
        });
    }
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::dispatch::ExecutorFn;
    use crate::error::{ActionError, SchedulerError};
    use crate::model::{Address, Kind};
    use crate::scheduler::testing::{WAIT, context};
    use crate::scheduler::{EventKind, Triggers, launch, settle};

    #[tokio::test]
    async fn live_triggers_are_executed_and_reported() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let addr = Address::repeat(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let exec = ExecutorFn::arc(move |req: ActionRequest, _ctx: CancellationToken| {
            s.lock().unwrap().push(req);
            async { Ok(()) }
        });
        let dispatcher = TriggerDispatcher::new(exec, RetryPolicy::default(), ctx.bus.clone());

        let (sched, task) = launch(&ctx, Kind::Payout, addr, move |log, token| async move {
            let mut t = Triggers::new(addr, &token, 4);
            let stale = t.rearm(EventKind::TriggerCrank, addr);
            t.cancel(EventKind::TriggerCrank);
            log.emit(Event::new(10, EventKind::TriggerCrank, true).with_trigger(stale))
                .await?;
            let live = t.rearm(EventKind::TriggerCloseBids, addr);
            log.emit(Event::new(11, EventKind::TriggerCloseBids, true).with_trigger(live))
                .await?;
            let report = t.next_report().await;
            settle(&report)?;
            assert_eq!(report.kind, EventKind::TriggerCloseBids);
            assert_eq!(report.result, Ok(()));
            Ok(())
        });
        dispatcher.spawn(sched.subscribe().await.unwrap(), &root);

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![ActionRequest {
                kind: EventKind::TriggerCloseBids,
                subject: addr,
                slot: 11,
            }]
        );
    }

    #[tokio::test]
    async fn exhausted_trigger_fails_its_scheduler() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let addr = Address::repeat(8);
        let exec = ExecutorFn::arc(|_req: ActionRequest, _ctx: CancellationToken| async {
            Err(ActionError::fail("node unavailable"))
        });
        let policy = RetryPolicy::constant(2, Duration::from_millis(5));
        let dispatcher = TriggerDispatcher::new(exec, policy, ctx.bus.clone());

        let (sched, task) = launch(&ctx, Kind::Receipt, addr, move |log, token| async move {
            let mut t = Triggers::new(addr, &token, 4);
            let trigger = t.rearm(EventKind::TriggerValidatorWithdraw, addr);
            log.emit(Event::new(1, EventKind::TriggerValidatorWithdraw, true).with_trigger(trigger))
                .await?;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    report = t.next_report() => settle(&report)?,
                }
            }
        });
        let mut history = sched.subscribe().await.unwrap();
        dispatcher.spawn(sched.subscribe().await.unwrap(), &root);

        let res = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(
            res,
            Err(SchedulerError::TriggerFailed {
                kind: EventKind::TriggerValidatorWithdraw,
                error: DispatchError::Exhausted { tries: 2, .. },
            })
        ));
        // The history replays, then closes with the failure.
        assert!(history.recv().await.unwrap().is_some());
        assert!(history.recv().await.is_err());
    }
}
