//! # Scheduler events and triggers.
//!
//! Every scheduler records an ordered history of [`Event`]s. Events whose kind
//! starts with `Trigger` carry a [`Trigger`]: a request that an external action
//! be attempted, valid for as long as its token is not cancelled.
//!
//! ## `is_state_change`
//! `true` when the condition became true while the scheduler was watching;
//! `false` when it already held when the scheduler started. Consumers skip
//! idempotent work for the latter after a restart.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::model::Address;

/// Classification of scheduler events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Pipeline ===
    /// A newer tail period was observed.
    PeriodAppended,
    /// Append the next period of the ring.
    TriggerPeriodAppend,

    // === Payout ===
    /// Slot reached `period.start - lookahead`.
    PreStart,
    /// Register the validator set with the payout.
    TriggerValidatorSetPayout,
    /// First receipt observed; validators are joining.
    ValidatorIsAdding,
    /// First staker observed.
    StakerIsAdding,
    PeriodStart,
    /// Period started; no more stakers can join.
    StakerAddingDone,
    /// Advance bid processing.
    TriggerCrank,
    BidFinal,
    PeriodFinish,
    TriggerCloseBids,
    BidClosed,
    /// Post-finish delay elapsed.
    DelayClosePayout,
    ValidatorHaveWithdrawn,
    TriggerClosePayout,

    // === Validator ===
    /// Activated/total stake ratio changed.
    StakeStatus,
    ReceiptAdded,
    ReceiptRemoved,

    // === Receipt ===
    ReceiptOpen,
    /// Payout period finished; the validator may withdraw.
    ReceiptFinishable,
    TriggerValidatorWithdraw,
    ReceiptWithdrawn,

    // === Staker ===
    StakerRegistered,
    /// Receipt closed; the stake may be withdrawn.
    StakerFinishable,
    TriggerStakerWithdraw,
    StakerWithdrawn,
}

impl EventKind {
    /// Whether events of this kind carry a [`Trigger`].
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            EventKind::TriggerPeriodAppend
                | EventKind::TriggerValidatorSetPayout
                | EventKind::TriggerCrank
                | EventKind::TriggerCloseBids
                | EventKind::TriggerClosePayout
                | EventKind::TriggerValidatorWithdraw
                | EventKind::TriggerStakerWithdraw
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::PeriodAppended => "period_appended",
            EventKind::TriggerPeriodAppend => "trigger_period_append",
            EventKind::PreStart => "pre_start",
            EventKind::TriggerValidatorSetPayout => "trigger_validator_set_payout",
            EventKind::ValidatorIsAdding => "validator_is_adding",
            EventKind::StakerIsAdding => "staker_is_adding",
            EventKind::PeriodStart => "period_start",
            EventKind::StakerAddingDone => "staker_adding_done",
            EventKind::TriggerCrank => "trigger_crank",
            EventKind::BidFinal => "bid_final",
            EventKind::PeriodFinish => "period_finish",
            EventKind::TriggerCloseBids => "trigger_close_bids",
            EventKind::BidClosed => "bid_closed",
            EventKind::DelayClosePayout => "delay_close_payout",
            EventKind::ValidatorHaveWithdrawn => "validator_have_withdrawn",
            EventKind::TriggerClosePayout => "trigger_close_payout",
            EventKind::StakeStatus => "stake_status",
            EventKind::ReceiptAdded => "receipt_added",
            EventKind::ReceiptRemoved => "receipt_removed",
            EventKind::ReceiptOpen => "receipt_open",
            EventKind::ReceiptFinishable => "receipt_finishable",
            EventKind::TriggerValidatorWithdraw => "trigger_validator_withdraw",
            EventKind::ReceiptWithdrawn => "receipt_withdrawn",
            EventKind::StakerRegistered => "staker_registered",
            EventKind::StakerFinishable => "staker_finishable",
            EventKind::TriggerStakerWithdraw => "trigger_staker_withdraw",
            EventKind::StakerWithdrawn => "staker_withdrawn",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One entry of a scheduler's history.
#[derive(Clone, Debug)]
pub struct Event {
    /// Slot at which the scheduler observed the transition.
    pub slot: u64,
    pub kind: EventKind,
    pub is_state_change: bool,
    /// Related address (receipt, staker, pipeline...), when the kind has one.
    pub subject: Option<Address>,
    /// Present on trigger kinds.
    pub trigger: Option<Trigger>,
}

impl Event {
    pub fn new(slot: u64, kind: EventKind, is_state_change: bool) -> Self {
        Self {
            slot,
            kind,
            is_state_change,
            subject: None,
            trigger: None,
        }
    }

    pub fn with_subject(mut self, subject: Address) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

/// Outcome of a dispatched trigger, sent back to the scheduler that raised it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub id: u64,
    pub kind: EventKind,
    pub result: Result<(), DispatchError>,
}

/// Request for an external action, owned by the scheduler that raised it.
///
/// The token is cancelled when the condition that raised the trigger is
/// superseded or when the scheduler stops.
#[derive(Clone, Debug)]
pub struct Trigger {
    id: u64,
    kind: EventKind,
    subject: Address,
    token: CancellationToken,
    report: mpsc::Sender<Report>,
}

impl Trigger {
    pub(crate) fn new(
        id: u64,
        kind: EventKind,
        subject: Address,
        token: CancellationToken,
        report: mpsc::Sender<Report>,
    ) -> Self {
        Self {
            id,
            kind,
            subject,
            token,
            report,
        }
    }

    /// Per-scheduler trigger id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Address the action applies to.
    pub fn subject(&self) -> Address {
        self.subject
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the trigger has been superseded.
    pub fn is_stale(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sends the final outcome to the owning scheduler.
    ///
    /// Returns `false` if the scheduler is gone.
    pub async fn report(&self, result: Result<(), DispatchError>) -> bool {
        let report = Report {
            id: self.id,
            kind: self.kind,
            result,
        };
        self.report.send(report).await.is_ok()
    }
}
