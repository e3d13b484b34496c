//! # Payout scheduler.
//!
//! Drives one payout from pre-start to close. State flags are monotonic.
//!
//! ```text
//! slot ≥ start - lookahead ─► PreStart, TriggerValidatorSetPayout (until a validator joins)
//! slot ≥ start             ─► PeriodStart, StakerAddingDone, TriggerCrank (until bids final/closed)
//! bid list final           ─► BidFinal
//! slot ≥ finish            ─► PeriodFinish, TriggerCloseBids (until bids closed)
//! bid list blank           ─► BidClosed
//! slot ≥ finish + delay    ─► DelayClosePayout
//! validators back to zero  ─► ValidatorHaveWithdrawn
//! closed ∧ delay ∧ withdrawn ─► TriggerClosePayout (once; terminal)
//! ```
//!
//! The slot, data and bid list replayed when the scheduler attaches are its
//! baseline. Boundaries already behind the baseline slot are reported with
//! `is_state_change == false` and raise neither the validator-set trigger nor
//! the crank. Close-bids and close-payout are guarded by conditions only, so
//! they still fire after a restart.

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    Context, Event, EventKind, EventLog, Report, Scheduler, SchedulerTask, Triggers, baseline,
    launch, settle,
};
use crate::config::PayoutConfig;
use crate::error::SchedulerError;
use crate::model::{Address, BidList, Kind, PayoutData, Period};
use crate::objects::Payout;

/// Spawns the scheduler of `payout`.
pub fn spawn_payout(ctx: &Context, payout: Payout, cfg: PayoutConfig) -> (Scheduler, SchedulerTask) {
    let clock = ctx.clock.clone();
    let buffer = ctx.buffer;
    launch(ctx, Kind::Payout, payout.address(), move |log, token| async move {
        let mut slots = clock.subscribe().await?;
        let mut data = payout.data().await?;
        let mut bids = payout.bids().await?;
        let slot = baseline(&mut slots);
        let list = baseline(&mut bids);

        // The object always publishes its creation data first.
        let Some(first) = data.recv().await? else {
            return Ok(());
        };
        let triggers = Triggers::new(payout.address(), &token, buffer);
        let mut m = Machine::new(log, triggers, payout.address(), first.period, cfg);
        m.slot = slot;
        m.on_data(&first, false).await?;
        if let Some(slot) = slot {
            m.on_slot(slot, false).await?;
        }
        if let Some(list) = list {
            m.on_bids(&list, false).await?;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = payout.closed() => {
                    debug!(address = %payout.address(), "payout closed; scheduler done");
                    break;
                }
                slot = slots.recv(), if !m.terminal => match slot? {
                    Some(slot) => m.on_slot(slot, true).await?,
                    None => break,
                },
                d = data.recv(), if !m.terminal => match d? {
                    Some(d) => m.on_data(&d, true).await?,
                    None => break,
                },
                list = bids.recv(), if !m.terminal => match list? {
                    Some(list) => m.on_bids(&list, true).await?,
                    None => break,
                },
                report = m.triggers.next_report() => {
                    if m.on_report(report).await? {
                        break;
                    }
                }
            }
        }
        m.triggers.cancel_all();
        Ok(())
    })
}

struct Machine {
    log: EventLog,
    triggers: Triggers,
    address: Address,
    period: Period,
    cfg: PayoutConfig,

    slot: Option<u64>,

    pre_start: bool,
    has_started: bool,
    has_finished: bool,
    bid_is_final: bool,
    bid_has_closed: bool,
    clock_ready_to_close: bool,
    validator_adding_has_started: bool,
    validator_has_withdrawn: bool,
    staker_adding_has_started: bool,
    staker_adding_is_done: bool,
    terminal: bool,
}

impl Machine {
    fn new(log: EventLog, triggers: Triggers, address: Address, period: Period, cfg: PayoutConfig) -> Self {
        Self {
            log,
            triggers,
            address,
            period,
            cfg,
            slot: None,
            pre_start: false,
            has_started: false,
            has_finished: false,
            bid_is_final: false,
            bid_has_closed: false,
            clock_ready_to_close: false,
            validator_adding_has_started: false,
            validator_has_withdrawn: false,
            staker_adding_has_started: false,
            staker_adding_is_done: false,
            terminal: false,
        }
    }

    fn now(&self) -> u64 {
        self.slot.unwrap_or(0)
    }

    async fn emit(&self, kind: EventKind, is_state_change: bool) -> Result<(), SchedulerError> {
        self.log.emit(Event::new(self.now(), kind, is_state_change)).await
    }

    /// `live` is false only for the slot replayed at attach time.
    async fn on_slot(&mut self, slot: u64, live: bool) -> Result<(), SchedulerError> {
        self.slot = Some(slot);
        let start = self.period.start;
        let finish = self.period.finish();

        let pre = start.saturating_sub(self.cfg.pre_start_lookahead);
        if !self.pre_start && slot >= pre {
            self.pre_start = true;
            self.emit(EventKind::PreStart, live).await?;
            if live && !self.validator_adding_has_started && slot < start {
                if let Some(t) = self.triggers.arm_once(EventKind::TriggerValidatorSetPayout) {
                    let ev = Event::new(slot, EventKind::TriggerValidatorSetPayout, true)
                        .with_subject(self.address)
                        .with_trigger(t);
                    self.log.emit(ev).await?;
                }
            }
        }

        if !self.has_started && slot >= start {
            self.has_started = true;
            self.triggers.cancel(EventKind::TriggerValidatorSetPayout);
            self.emit(EventKind::PeriodStart, live).await?;
            self.staker_adding_is_done = true;
            self.emit(EventKind::StakerAddingDone, live).await?;
            if live && !self.bid_is_final && !self.bid_has_closed {
                self.crank().await?;
            }
        }

        if !self.has_finished && slot >= finish {
            self.has_finished = true;
            self.emit(EventKind::PeriodFinish, live).await?;
            if !self.bid_has_closed {
                if let Some(t) = self.triggers.arm_once(EventKind::TriggerCloseBids) {
                    let ev = Event::new(slot, EventKind::TriggerCloseBids, true)
                        .with_subject(self.address)
                        .with_trigger(t);
                    self.log.emit(ev).await?;
                }
            }
            if !self.validator_adding_has_started && !self.validator_has_withdrawn {
                // Nobody joined; there is nobody left to withdraw.
                self.validator_has_withdrawn = true;
                self.emit(EventKind::ValidatorHaveWithdrawn, live).await?;
            }
        }

        let ready = finish.saturating_add(self.cfg.post_finish_delay);
        if !self.clock_ready_to_close && slot >= ready {
            self.clock_ready_to_close = true;
            self.emit(EventKind::DelayClosePayout, live).await?;
        }

        self.try_close().await
    }

    async fn on_data(&mut self, data: &Arc<PayoutData>, change: bool) -> Result<(), SchedulerError> {
        if data.validator_count > 0 && !self.validator_adding_has_started {
            self.validator_adding_has_started = true;
            self.triggers.cancel(EventKind::TriggerValidatorSetPayout);
            self.emit(EventKind::ValidatorIsAdding, change).await?;
        }
        if data.staker_count > 0 && !self.staker_adding_has_started {
            self.staker_adding_has_started = true;
            self.emit(EventKind::StakerIsAdding, change).await?;
        }
        if data.validator_count == 0
            && self.validator_adding_has_started
            && !self.validator_has_withdrawn
        {
            self.validator_has_withdrawn = true;
            self.emit(EventKind::ValidatorHaveWithdrawn, change).await?;
        }
        self.try_close().await
    }

    async fn on_bids(&mut self, list: &Arc<BidList>, change: bool) -> Result<(), SchedulerError> {
        if list.is_blank() {
            if !self.bid_has_closed {
                self.bid_has_closed = true;
                self.triggers.cancel(EventKind::TriggerCrank);
                self.triggers.cancel(EventKind::TriggerCloseBids);
                self.emit(EventKind::BidClosed, change).await?;
            }
        } else if list.is_final && !self.bid_is_final {
            self.bid_is_final = true;
            self.triggers.cancel(EventKind::TriggerCrank);
            self.emit(EventKind::BidFinal, change).await?;
        }
        self.try_close().await
    }

    /// Returns `true` once the scheduler is done.
    async fn on_report(&mut self, report: Report) -> Result<bool, SchedulerError> {
        settle(&report)?;
        if report.result.is_err() {
            return Ok(false);
        }
        info!(address = %self.address, kind = %report.kind, "trigger succeeded");
        match report.kind {
            EventKind::TriggerCrank
                if self.has_started && !self.bid_is_final && !self.bid_has_closed =>
            {
                self.crank().await?;
                Ok(false)
            }
            EventKind::TriggerClosePayout => Ok(true),
            _ => Ok(false),
        }
    }

    async fn crank(&mut self) -> Result<(), SchedulerError> {
        let t = self.triggers.rearm(EventKind::TriggerCrank, self.address);
        let ev = Event::new(self.now(), EventKind::TriggerCrank, true)
            .with_subject(self.address)
            .with_trigger(t);
        self.log.emit(ev).await
    }

    async fn try_close(&mut self) -> Result<(), SchedulerError> {
        if self.terminal
            || !(self.bid_has_closed && self.clock_ready_to_close && self.validator_has_withdrawn)
        {
            return Ok(());
        }
        self.terminal = true;
        if let Some(t) = self.triggers.arm_once(EventKind::TriggerClosePayout) {
            let ev = Event::new(self.now(), EventKind::TriggerClosePayout, true)
                .with_subject(self.address)
                .with_trigger(t);
            self.log.emit(ev).await?;
        }
        Ok(())
    }
}
