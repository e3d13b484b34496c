//! # Validator scheduler.
//!
//! Reports stake-ratio changes and the receipts a validator joins or leaves.
//! It has no triggers and ends when the validator object closes.

use std::collections::BTreeSet;

use super::{Context, Event, EventKind, Scheduler, SchedulerTask, launch};
use crate::model::{Address, Kind, Ratio};
use crate::objects::Validator;

/// Spawns the scheduler of `validator`.
pub fn spawn_validator(ctx: &Context, validator: Validator) -> (Scheduler, SchedulerTask) {
    let clock = ctx.clock.clone();
    launch(ctx, Kind::Validator, validator.address(), move |log, token| async move {
        let mut slots = clock.subscribe().await?;
        let mut data = validator.data().await?;
        let mut receipts = validator.receipts().await?;

        let mut slot = 0u64;
        let mut ratio: Option<Ratio> = None;
        let mut held: Option<BTreeSet<Address>> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                s = slots.recv() => match s? {
                    Some(s) => slot = s,
                    None => break,
                },
                d = data.recv() => match d? {
                    Some(d) => {
                        let next = d.stake_ratio();
                        if ratio != Some(next) {
                            let change = ratio.is_some();
                            ratio = Some(next);
                            log.emit(Event::new(slot, EventKind::StakeStatus, change)).await?;
                        }
                    }
                    None => break,
                },
                set = receipts.recv() => match set? {
                    Some(set) => {
                        let change = held.is_some();
                        let prev = held.take().unwrap_or_default();
                        for added in set.difference(&prev) {
                            let ev = Event::new(slot, EventKind::ReceiptAdded, change).with_subject(*added);
                            log.emit(ev).await?;
                        }
                        for removed in prev.difference(&set) {
                            let ev = Event::new(slot, EventKind::ReceiptRemoved, true).with_subject(*removed);
                            log.emit(ev).await?;
                        }
                        held = Some(set.as_ref().clone());
                    }
                    None => break,
                },
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::super::testing::*;
    use super::*;
    use crate::model::ValidatorData;

    #[tokio::test]
    async fn receipt_diffs_and_stake_changes() {
        let root = CancellationToken::new();
        let ctx = context(&root);
        let data = ValidatorData {
            balance: 1,
            activated_stake: 1,
            total_stake: 4,
        };
        let v = Validator::spawn(Address::repeat(3), 1, data.clone(), 16, &root);
        let (sched, task) = spawn_validator(&ctx, v.clone());
        let mut sub = sched.subscribe().await.unwrap();

        let first = until(&mut sub, EventKind::StakeStatus).await;
        assert!(!first.last().unwrap().is_state_change);

        v.add_receipt(Address::repeat(7)).await;
        let added = until(&mut sub, EventKind::ReceiptAdded).await;
        assert_eq!(added.last().unwrap().subject, Some(Address::repeat(7)));
        assert!(added.last().unwrap().is_state_change);

        v.update(ValidatorData {
            activated_stake: 2,
            ..data
        })
        .await;
        let status = until(&mut sub, EventKind::StakeStatus).await;
        assert!(status.last().unwrap().is_state_change);

        v.remove_receipt(Address::repeat(7)).await;
        until(&mut sub, EventKind::ReceiptRemoved).await;

        v.close().await;
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    }
}
