//! # Receipt scheduler.
//!
//! Once the receipt's payout period has finished, asks the validator to
//! withdraw (`TriggerValidatorWithdraw`, once). The receipt closing ends the
//! lifecycle with `ReceiptWithdrawn`.
//!
//! A payout that can no longer be found has already been closed, which only
//! happens after its period finished, so the receipt is finishable at once.

use tracing::{debug, info};

use super::{
    Context, Event, EventKind, EventLog, Scheduler, SchedulerTask, Triggers, baseline, launch,
    settle,
};
use crate::error::{RouterError, SchedulerError};
use crate::model::{Address, Kind};
use crate::objects::{Payout, Receipt};

/// Spawns the scheduler of `receipt`.
pub fn spawn_receipt(ctx: &Context, receipt: Receipt) -> (Scheduler, SchedulerTask) {
    let clock = ctx.clock.clone();
    let router = ctx.router.clone();
    let buffer = ctx.buffer;
    let address = receipt.address();

    launch(ctx, Kind::Receipt, address, move |log, token| async move {
        let mut slots = clock.subscribe().await?;
        let mut data = receipt.data().await?;
        let mut slot = baseline(&mut slots);
        let Some(first) = data.recv().await? else {
            return Ok(());
        };

        let finish = match router.payout_by_id(first.payout).await {
            Ok(payout) => period_finish(&payout).await,
            Err(RouterError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        debug!(%address, payout = %first.payout, ?finish, "receipt bound to payout");

        let mut triggers = Triggers::new(address, &token, buffer);
        let due = |s: u64| finish.is_none_or(|f| s >= f);
        log.emit(
            Event::new(slot.unwrap_or(0), EventKind::ReceiptOpen, false).with_subject(first.validator),
        )
        .await?;

        let mut finishable = false;
        if let Some(s) = slot.filter(|s| due(*s)) {
            finishable = true;
            mark_finishable(&log, &mut triggers, first.validator, s, false).await?;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                s = slots.recv(), if !finishable => match s? {
                    Some(s) => {
                        slot = Some(s);
                        if due(s) {
                            finishable = true;
                            // Without a payout the period ended before we watched.
                            let change = finish.is_some();
                            mark_finishable(&log, &mut triggers, first.validator, s, change).await?;
                        }
                    }
                    None => break,
                },
                d = data.recv() => match d? {
                    Some(_) => {}
                    None => {
                        triggers.cancel(EventKind::TriggerValidatorWithdraw);
                        let ev = Event::new(slot.unwrap_or(0), EventKind::ReceiptWithdrawn, true);
                        log.emit(ev).await?;
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

/// Finish slot of the payout's period; `None` once the payout is gone.
async fn period_finish(payout: &Payout) -> Option<u64> {
    let mut data = match payout.data().await {
        Ok(sub) => sub,
        Err(e) => {
            debug!(payout = %payout.address(), error = %e, "payout gone before attach");
            return None;
        }
    };
    match data.recv().await {
        Ok(Some(d)) => Some(d.period.finish()),
        Ok(None) => None,
        Err(e) => {
            debug!(payout = %payout.address(), error = %e, "payout gone before attach");
            None
        }
    }
}

async fn mark_finishable(
    log: &EventLog,
    triggers: &mut Triggers,
    validator: Address,
    slot: u64,
    change: bool,
) -> Result<(), SchedulerError> {
    log.emit(Event::new(slot, EventKind::ReceiptFinishable, change)).await?;
    if let Some(t) = triggers.arm_once(EventKind::TriggerValidatorWithdraw) {
        let ev = Event::new(slot, EventKind::TriggerValidatorWithdraw, true)
            .with_subject(validator)
            .with_trigger(t);
        log.emit(ev).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::super::testing::*;
    use super::*;
    use crate::model::{
        AccountPayload, AccountUpdate, Address, PayoutData, Period, PipelineData, Ratio,
        ReceiptData,
    };

    fn receipt_data(payout: Address) -> ReceiptData {
        ReceiptData {
            payout,
            validator: Address::repeat(4),
            balance: 2,
            tx_sent: 0,
            tx_approved: 0,
            staker_count: 0,
        }
    }

    #[tokio::test]
    async fn withdraw_requested_after_period_finish() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let (pipe, payout) = (Address::repeat(1), Address::repeat(2));
        ctx.router
            .add_pipeline(
                pipe,
                PipelineData {
                    balance: 1,
                    relative_stake: Ratio::new(1, 1),
                    tps: 1,
                },
            )
            .await
            .unwrap();
        ctx.router
            .update(AccountUpdate::open(
                payout,
                AccountPayload::Payout(PayoutData {
                    pipeline: pipe,
                    period: Period::new(100, 50),
                    balance: 1,
                    validator_count: 1,
                    staker_count: 0,
                }),
            ))
            .await
            .unwrap();
        ctx.router.payout_by_id(payout).await.unwrap();

        ctx.clock.advance(140).await.unwrap();
        clock_at(&ctx, 140).await;
        let receipt = Receipt::spawn(Address::repeat(5), 1, receipt_data(payout), 16, &root);
        let (sched, task) = spawn_receipt(&ctx, receipt.clone());
        let mut sub = sched.subscribe().await.unwrap();
        let open = until(&mut sub, EventKind::ReceiptOpen).await;
        assert_eq!(open[0].slot, 140);
        clock_subscribers(&ctx, 1).await;

        ctx.clock.advance(150).await.unwrap();
        let seen = until(&mut sub, EventKind::TriggerValidatorWithdraw).await;
        assert_eq!(
            kinds(&seen),
            vec![EventKind::ReceiptFinishable, EventKind::TriggerValidatorWithdraw]
        );
        assert!(seen[0].is_state_change);
        let trigger = seen[1].trigger.clone().unwrap();

        receipt.update(ReceiptData { balance: 0, ..receipt_data(payout) }).await;
        until(&mut sub, EventKind::ReceiptWithdrawn).await;
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert!(trigger.is_stale());
    }

    #[tokio::test]
    async fn missing_payout_means_finishable() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        ctx.clock.advance(1).await.unwrap();
        let receipt = Receipt::spawn(Address::repeat(5), 1, receipt_data(Address::repeat(2)), 16, &root);
        let (sched, _task) = spawn_receipt(&ctx, receipt);
        let mut sub = sched.subscribe().await.unwrap();
        let seen = until(&mut sub, EventKind::TriggerValidatorWithdraw).await;
        assert!(kinds(&seen).contains(&EventKind::ReceiptFinishable));
    }

    fn payout_data() -> PayoutData {
        PayoutData {
            pipeline: Address::repeat(1),
            period: Period::new(100, 50),
            balance: 1,
            validator_count: 1,
            staker_count: 0,
        }
    }

    #[tokio::test]
    async fn closed_payout_has_no_finish() {
        let root = CancellationToken::new();
        let payout = Payout::spawn(Address::repeat(2), 1, payout_data(), 4, &root);
        assert_eq!(period_finish(&payout).await, Some(150));

        payout.close().await;
        tokio::time::timeout(WAIT, payout.closed()).await.unwrap();
        assert_eq!(period_finish(&payout).await, None);
    }

    #[tokio::test]
    async fn payout_closed_before_attach_is_not_fatal() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let payout = Address::repeat(2);
        ctx.router
            .update(AccountUpdate::open(payout, AccountPayload::Payout(payout_data())))
            .await
            .unwrap();
        let handle = ctx.router.payout_by_id(payout).await.unwrap();
        handle.close().await;
        tokio::time::timeout(WAIT, handle.closed()).await.unwrap();

        ctx.clock.advance(10).await.unwrap();
        let receipt = Receipt::spawn(Address::repeat(5), 1, receipt_data(payout), 16, &root);
        let (sched, task) = spawn_receipt(&ctx, receipt.clone());
        let mut sub = sched.subscribe().await.unwrap();
        let seen = until(&mut sub, EventKind::TriggerValidatorWithdraw).await;
        assert!(kinds(&seen).contains(&EventKind::ReceiptFinishable));
        assert!(!task.is_finished());

        receipt.close().await;
        until(&mut sub, EventKind::ReceiptWithdrawn).await;
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    }
}
