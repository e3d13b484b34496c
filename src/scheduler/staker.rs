//! # Staker scheduler.
//!
//! A stake can be withdrawn once the receipt it backs has closed. The staker
//! raises `TriggerStakerWithdraw` once at that point and ends with
//! `StakerWithdrawn` when its own account closes.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    Context, Event, EventKind, Scheduler, SchedulerTask, Triggers, baseline, launch, settle,
};
use crate::error::RouterError;
use crate::model::Kind;
use crate::objects::Staker;

/// Spawns the scheduler of `staker`.
pub fn spawn_staker(ctx: &Context, staker: Staker) -> (Scheduler, SchedulerTask) {
    let clock = ctx.clock.clone();
    let router = ctx.router.clone();
    let buffer = ctx.buffer;
    let address = staker.address();

    launch(ctx, Kind::Staker, address, move |log, token| async move {
        let mut slots = clock.subscribe().await?;
        let mut data = staker.data().await?;
        let mut slot = baseline(&mut slots).unwrap_or(0);
        let Some(first) = data.recv().await? else {
            return Ok(());
        };
        let receipt = match router.receipt_by_id(first.receipt).await {
            Ok(r) => Some(r),
            Err(RouterError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        // A receipt that is already gone reads as closed.
        let watched = match &receipt {
            Some(r) => r.close_token(),
            None => {
                let gone = CancellationToken::new();
                gone.cancel();
                gone
            }
        };

        let mut triggers = Triggers::new(address, &token, buffer);
        let mut finishable = false;
        log.emit(Event::new(slot, EventKind::StakerRegistered, false).with_subject(first.receipt))
            .await?;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                s = slots.recv() => match s? {
                    Some(s) => slot = s,
                    None => break,
                },
                _ = watched.cancelled(), if !finishable => {
                    finishable = true;
                    let change = receipt.is_some();
                    log.emit(Event::new(slot, EventKind::StakerFinishable, change)).await?;
                    if let Some(t) = triggers.arm_once(EventKind::TriggerStakerWithdraw) {
                        let ev = Event::new(slot, EventKind::TriggerStakerWithdraw, true)
                            .with_subject(address)
                            .with_trigger(t);
                        log.emit(ev).await?;
                    }
                }
                d = data.recv() => match d? {
                    Some(_) => {}
                    None => {
                        triggers.cancel(EventKind::TriggerStakerWithdraw);
                        log.emit(Event::new(slot, EventKind::StakerWithdrawn, true)).await?;
                        break;
                    }
                },
                report = triggers.next_report() => {
                    settle(&report)?;
                    if report.result.is_ok() {
                        info!(%address, kind = %report.kind, "trigger succeeded");
                    }
                }
            }
        }
        triggers.cancel_all();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::model::{
        AccountPayload, AccountUpdate, Address, PayoutData, Period, PipelineData, Ratio,
        ReceiptData, StakerData, ValidatorData,
    };

    const RECEIPT: Address = Address::repeat(5);

    fn receipt_data(balance: u64) -> ReceiptData {
        ReceiptData {
            payout: Address::repeat(2),
            validator: Address::repeat(4),
            balance,
            tx_sent: 0,
            tx_approved: 0,
            staker_count: 1,
        }
    }

    fn staker_data(balance: u64) -> StakerData {
        StakerData {
            receipt: RECEIPT,
            balance,
            stake: 10,
        }
    }

    /// Registers pipeline, payout, validator and receipt with the router.
    async fn seed(ctx: &Context) {
        let pipe = Address::repeat(1);
        let updates = [
            AccountUpdate::open(
                pipe,
                AccountPayload::Pipeline(PipelineData {
                    balance: 1,
                    relative_stake: Ratio::new(1, 1),
                    tps: 1,
                }),
            ),
            AccountUpdate::open(
                Address::repeat(2),
                AccountPayload::Payout(PayoutData {
                    pipeline: pipe,
                    period: Period::new(100, 50),
                    balance: 1,
                    validator_count: 1,
                    staker_count: 1,
                }),
            ),
            AccountUpdate::open(
                Address::repeat(4),
                AccountPayload::Validator(ValidatorData {
                    balance: 1,
                    activated_stake: 0,
                    total_stake: 0,
                }),
            ),
            AccountUpdate::open(RECEIPT, AccountPayload::Receipt(receipt_data(1))),
        ];
        for u in updates {
            ctx.router.update(u).await.unwrap();
        }
        ctx.router.receipt_by_id(RECEIPT).await.unwrap();
    }

    #[tokio::test]
    async fn receipt_close_makes_stake_withdrawable() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        seed(&ctx).await;
        ctx.clock.advance(30).await.unwrap();
        clock_at(&ctx, 30).await;

        let staker = Staker::spawn(Address::repeat(6), 1, staker_data(3), 16, &root);
        let (sched, task) = spawn_staker(&ctx, staker.clone());
        let mut sub = sched.subscribe().await.unwrap();
        let seen = until(&mut sub, EventKind::StakerRegistered).await;
        assert_eq!((seen[0].slot, seen[0].subject), (30, Some(RECEIPT)));

        ctx.router
            .update(AccountUpdate::closed(RECEIPT, AccountPayload::Receipt(receipt_data(0))))
            .await
            .unwrap();
        let seen = until(&mut sub, EventKind::TriggerStakerWithdraw).await;
        assert_eq!(
            kinds(&seen),
            vec![EventKind::StakerFinishable, EventKind::TriggerStakerWithdraw]
        );
        assert!(seen[0].is_state_change);
        let trigger = seen[1].trigger.clone().unwrap();
        assert_eq!(trigger.subject(), Address::repeat(6));

        staker.update(staker_data(0)).await;
        until(&mut sub, EventKind::StakerWithdrawn).await;
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert!(trigger.is_stale());
    }

    #[tokio::test]
    async fn missing_receipt_is_finishable_at_once() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let staker = Staker::spawn(Address::repeat(6), 1, staker_data(3), 16, &root);
        let (sched, _task) = spawn_staker(&ctx, staker);
        let mut sub = sched.subscribe().await.unwrap();
        let seen = until(&mut sub, EventKind::TriggerStakerWithdraw).await;
        assert_eq!(
            kinds(&seen),
            vec![
                EventKind::StakerRegistered,
                EventKind::StakerFinishable,
                EventKind::TriggerStakerWithdraw
            ]
        );
        assert!(!seen[1].is_state_change);
    }
}
