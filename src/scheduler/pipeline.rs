//! # Pipeline scheduler.
//!
//! Keeps a pipeline's period ring ahead of the clock. The append target is
//! the end of the tail period; once `slot + lookahead` reaches it,
//! `TriggerPeriodAppend` is raised once for that target. Whoever appends the
//! next period, the newer tail cancels the stale trigger and is reported as
//! `PeriodAppended`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::{
    Context, Event, EventKind, EventLog, Report, Scheduler, SchedulerTask, Triggers, launch,
    settle,
};
use crate::config::PipelineConfig;
use crate::error::SchedulerError;
use crate::model::{Address, Kind, PeriodEntry, PeriodRing};
use crate::objects::Pipeline;

/// Pipeline scheduler handle; the append lookahead can be changed at runtime.
#[derive(Clone, Debug)]
pub struct PipelineScheduler {
    handle: Scheduler,
    lookahead: watch::Sender<u64>,
}

impl PipelineScheduler {
    pub fn handle(&self) -> &Scheduler {
        &self.handle
    }

    /// Sets how many slots ahead of the tail end the next append is requested.
    pub fn set_lookahead(&self, slots: u64) {
        self.lookahead.send_replace(slots);
    }

    pub fn lookahead(&self) -> u64 {
        *self.lookahead.borrow()
    }
}

/// Spawns the scheduler of `pipeline`.
pub fn spawn_pipeline(
    ctx: &Context,
    pipeline: Pipeline,
    cfg: PipelineConfig,
) -> (PipelineScheduler, SchedulerTask) {
    let clock = ctx.clock.clone();
    let buffer = ctx.buffer;
    let (lookahead_tx, mut lookahead) = watch::channel(cfg.lookahead);

    let (handle, task) = launch(ctx, Kind::Pipeline, pipeline.address(), move |log, token| async move {
        let mut slots = clock.subscribe().await?;
        let mut rings = pipeline.periods().await?;
        let mut data = pipeline.data().await?;
        let triggers = Triggers::new(pipeline.address(), &token, buffer);
        let mut m = Machine {
            log,
            triggers,
            address: pipeline.address(),
            lookahead: *lookahead.borrow_and_update(),
            slot: None,
            tail: None,
            seen_ring: false,
            target: None,
        };
        let mut tunable = true;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                slot = slots.recv() => match slot? {
                    Some(slot) => {
                        m.slot = Some(slot);
                        m.evaluate().await?;
                    }
                    None => break,
                },
                ring = rings.recv() => match ring? {
                    Some(ring) => m.on_ring(&ring).await?,
                    None => break,
                },
                // Only the end of the data stream matters: the object is gone.
                d = data.recv() => if d?.is_none() { break },
                changed = lookahead.changed(), if tunable => match changed {
                    Ok(()) => {
                        m.lookahead = *lookahead.borrow_and_update();
                        info!(address = %m.address, lookahead = m.lookahead, "append lookahead changed");
                        m.evaluate().await?;
                    }
                    Err(_) => tunable = false,
                },
                report = m.triggers.next_report() => m.on_report(report)?,
            }
        }
        m.triggers.cancel_all();
        Ok(())
    });

    let sched = PipelineScheduler {
        handle,
        lookahead: lookahead_tx,
    };
    (sched, task)
}

struct Machine {
    log: EventLog,
    triggers: Triggers,
    address: Address,
    lookahead: u64,
    slot: Option<u64>,
    tail: Option<PeriodEntry>,
    seen_ring: bool,
    /// Tail end for which an append was already requested.
    target: Option<u64>,
}

impl Machine {
    async fn on_ring(&mut self, ring: &Arc<PeriodRing>) -> Result<(), SchedulerError> {
        let change = self.seen_ring;
        self.seen_ring = true;
        let tail = ring.tail().copied();
        let newer = match (self.tail, tail) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(old), Some(new)) => new.period.start > old.period.start,
        };
        if newer {
            self.tail = tail;
            self.triggers.cancel(EventKind::TriggerPeriodAppend);
            if let Some(tail) = tail {
                let ev = Event::new(self.slot.unwrap_or(0), EventKind::PeriodAppended, change)
                    .with_subject(tail.payout);
                self.log.emit(ev).await?;
            }
        }
        self.evaluate().await
    }

    async fn evaluate(&mut self) -> Result<(), SchedulerError> {
        let (Some(slot), true) = (self.slot, self.seen_ring) else {
            return Ok(());
        };
        let end = self.tail.map(|t| t.period.finish()).unwrap_or(0);
        if self.target == Some(end) || slot.saturating_add(self.lookahead) < end {
            return Ok(());
        }
        self.target = Some(end);
        let t = self.triggers.rearm(EventKind::TriggerPeriodAppend, self.address);
        let ev = Event::new(slot, EventKind::TriggerPeriodAppend, true)
            .with_subject(self.address)
            .with_trigger(t);
        self.log.emit(ev).await
    }

    fn on_report(&mut self, report: Report) -> Result<(), SchedulerError> {
        settle(&report)?;
        if report.result.is_ok() {
            info!(address = %self.address, kind = %report.kind, "trigger succeeded");
        }
        Ok(())
    }
}
