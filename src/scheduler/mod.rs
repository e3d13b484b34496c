//! Entity schedulers: one actor per live object, deriving lifecycle events.
//!
//! Every scheduler watches the slot clock and its object's data, records an
//! ordered history of [`Event`]s and raises [`Trigger`]s for external actions.
//!
//! ## Contents
//! - [`Event`], [`EventKind`], [`Trigger`], [`Report`] history entries
//! - [`Scheduler`] handle (subscribe to history, stop, wait)
//! - [`PipelineScheduler`] pipeline handle with a mutable lookahead
//! - `spawn_*` one constructor per object kind
//!
//! ## Shape of every scheduler
//! ```text
//! slot clock ──┐
//! object data ─┼─► scheduler task ──► EventLog (Retain::All hub) ──► subscribers
//! reports ─────┘        │                                     └──► TriggerDispatcher
//!                       └─ Triggers (one token per outstanding trigger)
//! ```
//!
//! ## Rules
//! - History is totally ordered and replayed in full to late subscribers.
//! - What the clock and data hubs replay on subscribe is the baseline: a
//!   condition already true there is reported with `is_state_change == false`.
//!   Every value received afterwards is live and reported as a state change.
//! - A trigger that exhausts its retries terminates its scheduler; the history
//!   hub then closes with an error and every outstanding trigger is cancelled.

mod event;
mod log;
mod payout;
mod pipeline;
mod receipt;
mod staker;
mod trigger;
mod validator;

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::SlotClock;
use crate::error::{HubError, SchedulerError};
use crate::events::{Bus, Notice, NoticeKind};
use crate::hub::{Hub, Retain, Subscription};
use crate::model::{Address, Kind};
use crate::router::Router;

pub use event::{Event, EventKind, Report, Trigger};
pub use payout::spawn_payout;
pub use pipeline::{PipelineScheduler, spawn_pipeline};
pub use receipt::spawn_receipt;
pub use staker::spawn_staker;
pub use validator::spawn_validator;

pub(crate) use log::EventLog;
pub(crate) use trigger::Triggers;

/// Join handle of a scheduler task.
pub type SchedulerTask = JoinHandle<Result<(), SchedulerError>>;

/// Shared inputs of every scheduler.
#[derive(Clone, Debug)]
pub struct Context {
    pub(crate) clock: SlotClock,
    pub(crate) router: Router,
    pub(crate) bus: Bus,
    pub(crate) buffer: usize,
    pub(crate) token: CancellationToken,
}

impl Context {
    pub fn new(
        clock: SlotClock,
        router: Router,
        bus: Bus,
        buffer: usize,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            clock,
            router,
            bus,
            buffer: buffer.max(1),
            token: parent.clone(),
        }
    }
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Scheduler {
    object: Kind,
    address: Address,
    events: Hub<Event>,
    token: CancellationToken,
    finished: CancellationToken,
}

impl Scheduler {
    /// Kind of the object this scheduler follows.
    pub fn object(&self) -> Kind {
        self.object
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Subscribes to the history: every past event in order, then live ones.
    ///
    /// The stream ends with `Ok(None)` when the scheduler completes and with
    /// an error when it terminated abnormally.
    pub async fn subscribe(&self) -> Result<Subscription<Event>, HubError> {
        self.events.subscribe().await
    }

    /// Asks the scheduler to stop; outstanding triggers are cancelled.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the scheduler task has ended.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Completes once the scheduler task has ended.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }
}

/// Spawns a scheduler task around `body`.
///
/// `body` gets the event log and the scheduler token; its result decides how
/// the history hub is closed.
pub(crate) fn launch<F, Fut>(
    ctx: &Context,
    object: Kind,
    address: Address,
    body: F,
) -> (Scheduler, SchedulerTask)
where
    F: FnOnce(EventLog, CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
    let token = ctx.token.child_token();
    let finished = CancellationToken::new();
    let hub = Hub::spawn(Retain::All, ctx.buffer, &token);
    let log = EventLog::new(hub.clone(), ctx.bus.clone(), object, address);
    let bus = ctx.bus.clone();

    let handle = Scheduler {
        object,
        address,
        events: hub,
        token: token.clone(),
        finished: finished.clone(),
    };

    info!(%object, %address, "scheduler started");
    bus.publish(
        Notice::new(NoticeKind::SchedulerStarted)
            .with_subject(address)
            .with_object(object),
    );

    let fut = body(log.clone(), token.clone());
    let task = tokio::spawn(async move {
        let res = fut.await;
        match &res {
            Ok(()) => {
                log.close().await;
                info!(%object, %address, "scheduler stopped");
                bus.publish(
                    Notice::new(NoticeKind::SchedulerStopped)
                        .with_subject(address)
                        .with_object(object),
                );
            }
            Err(e) => {
                log.fail(e).await;
                warn!(%object, %address, error = %e, label = e.as_label(), "scheduler failed");
                bus.publish(
                    Notice::new(NoticeKind::SchedulerFailed)
                        .with_subject(address)
                        .with_object(object)
                        .with_reason(e.to_string()),
                );
            }
        }
        token.cancel();
        finished.cancel();
        res
    });
    (handle, task)
}

/// Latest value a subscription replayed on attach, if any.
///
/// Call right after subscribing; live values stay queued.
pub(crate) fn baseline<T>(sub: &mut Subscription<T>) -> Option<T> {
    let mut last = None;
    while let Some(v) = sub.try_replayed() {
        last = Some(v);
    }
    last
}

/// Maps a failed trigger report to the scheduler's terminal error.
///
/// Success and cancellation are both `Ok`.
pub(crate) fn settle(report: &Report) -> Result<(), SchedulerError> {
    match &report.result {
        Ok(()) => Ok(()),
        Err(e) if e.is_canceled() => Ok(()),
        Err(e) => Err(SchedulerError::TriggerFailed {
            kind: report.kind,
            error: e.clone(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the scheduler tests.

    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    pub(crate) const WAIT: Duration = Duration::from_secs(5);

    pub(crate) fn context(root: &CancellationToken) -> Context {
        let bus = Bus::new(256);
        let clock = SlotClock::spawn(16, root);
        let (router, _) = Router::spawn(16, bus.clone(), root);
        Context::new(clock, router, bus, 16, root)
    }

    /// Waits until `n` consumers subscribed to the slot clock.
    pub(crate) async fn clock_subscribers(ctx: &Context, n: usize) {
        timeout(WAIT, async {
            while ctx.clock.subscriber_count().await.unwrap_or(0) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("scheduler never subscribed to the clock");
    }

    /// Waits until the clock has published `slot`, so a scheduler spawned
    /// afterwards sees it as its baseline.
    pub(crate) async fn clock_at(ctx: &Context, slot: u64) {
        let mut sub = ctx.clock.subscribe().await.unwrap();
        timeout(WAIT, async {
            while let Ok(Some(s)) = sub.recv().await {
                if s >= slot {
                    break;
                }
            }
        })
        .await
        .expect("clock never reached the slot");
        let _ = sub.unsubscribe().await;
    }

    /// Reads until an event of `kind` arrives; returns everything read.
    pub(crate) async fn until(sub: &mut Subscription<Event>, kind: EventKind) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let ev = timeout(WAIT, sub.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {kind}; saw {seen:?}"))
                .expect("history closed with error")
                .unwrap_or_else(|| panic!("history ended before {kind}; saw {seen:?}"));
            let done = ev.kind == kind;
            seen.push(ev);
            if done {
                return seen;
            }
        }
    }

    pub(crate) fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::DispatchError;

    #[tokio::test]
    async fn baseline_is_the_replayed_slot_only() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let mut fresh = ctx.clock.subscribe().await.unwrap();
        assert_eq!(baseline(&mut fresh), None);

        ctx.clock.advance(40).await.unwrap();
        assert_eq!(tokio::time::timeout(WAIT, fresh.recv()).await.unwrap(), Ok(Some(40)));

        let mut late = ctx.clock.subscribe().await.unwrap();
        assert_eq!(baseline(&mut late), Some(40));
        ctx.clock.advance(41).await.unwrap();
        assert_eq!(baseline(&mut late), None);
        assert_eq!(tokio::time::timeout(WAIT, late.recv()).await.unwrap(), Ok(Some(41)));
    }

    #[tokio::test]
    async fn last_event_and_error_close_survive_termination() {
        for _ in 0..50 {
            let root = CancellationToken::new();
            let ctx = context(&root);
            let (go, ready) = tokio::sync::oneshot::channel::<()>();
            let (sched, task) = launch(&ctx, Kind::Receipt, Address::repeat(3), |log, _token| async move {
                let _ = ready.await;
                log.emit(Event::new(7, EventKind::ReceiptWithdrawn, true)).await?;
                Err(SchedulerError::Source(HubError::terminated("feed lost")))
            });
            let mut sub = sched.subscribe().await.unwrap();
            let _ = go.send(());

            let ev = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap().unwrap();
            assert_eq!(ev.kind, EventKind::ReceiptWithdrawn);
            assert!(tokio::time::timeout(WAIT, sub.recv()).await.unwrap().is_err());
            assert!(task.await.unwrap().is_err());
        }
    }

    #[test]
    fn cancellation_settles_as_success() {
        let report = Report {
            id: 1,
            kind: EventKind::TriggerCrank,
            result: Err(DispatchError::Canceled),
        };
        assert!(settle(&report).is_ok());
    }

    #[tokio::test]
    async fn late_subscriber_sees_full_history_first() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let (sched, _task) = launch(&ctx, Kind::Validator, Address::repeat(1), |log, token| async move {
            for slot in 0..5 {
                log.emit(Event::new(slot, EventKind::StakeStatus, true)).await?;
            }
            token.cancelled().await;
            Ok(())
        });

        let mut late = sched.subscribe().await.unwrap();
        let seen = until(&mut late, EventKind::StakeStatus).await;
        assert_eq!(seen[0].slot, 0);
        for slot in 1..5 {
            let ev = late.recv().await.unwrap().unwrap();
            assert_eq!(ev.slot, slot);
        }

        sched.stop();
        tokio::time::timeout(WAIT, sched.finished()).await.unwrap();
        assert!(matches!(late.recv().await, Ok(None)));
    }
}
