//! # Outstanding triggers of one scheduler.
//!
//! [`Triggers`] hands out [`Trigger`]s and keeps their tokens so that a
//! superseded condition can cancel them. One-shot kinds are armed at most once
//! for the lifetime of the scheduler, even after they were cancelled.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::event::{EventKind, Report, Trigger};
use crate::model::Address;

pub(crate) struct Triggers {
    subject: Address,
    parent: CancellationToken,
    next_id: u64,
    live: HashMap<EventKind, (u64, CancellationToken)>,
    armed: HashSet<EventKind>,
    tx: mpsc::Sender<Report>,
    rx: mpsc::Receiver<Report>,
}

impl Triggers {
    pub(crate) fn new(subject: Address, parent: &CancellationToken, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            subject,
            parent: parent.clone(),
            next_id: 0,
            live: HashMap::new(),
            armed: HashSet::new(),
            tx,
            rx,
        }
    }

    /// Arms a one-shot trigger; `None` if `kind` was armed before.
    pub(crate) fn arm_once(&mut self, kind: EventKind) -> Option<Trigger> {
        if !self.armed.insert(kind) {
            return None;
        }
        Some(self.issue(kind, self.subject))
    }

    /// Arms a fresh trigger of `kind`, cancelling the previous one if still live.
    pub(crate) fn rearm(&mut self, kind: EventKind, subject: Address) -> Trigger {
        self.cancel(kind);
        self.armed.insert(kind);
        self.issue(kind, subject)
    }

    fn issue(&mut self, kind: EventKind, subject: Address) -> Trigger {
        self.next_id += 1;
        let token = self.parent.child_token();
        self.live.insert(kind, (self.next_id, token.clone()));
        Trigger::new(self.next_id, kind, subject, token, self.tx.clone())
    }

    /// Cancels the live trigger of `kind`, if any.
    pub(crate) fn cancel(&mut self, kind: EventKind) -> bool {
        match self.live.remove(&kind) {
            Some((id, token)) => {
                debug!(subject = %self.subject, %kind, id, "trigger cancelled");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_live(&self, kind: EventKind) -> bool {
        self.live.contains_key(&kind)
    }

    pub(crate) fn was_armed(&self, kind: EventKind) -> bool {
        self.armed.contains(&kind)
    }

    /// Waits for the next report of a trigger that is still live.
    ///
    /// Reports of cancelled or replaced triggers are dropped here.
    pub(crate) async fn next_report(&mut self) -> Report {
        loop {
            let Some(report) = self.rx.recv().await else {
                // `self.tx` keeps the channel open.
                std::future::pending::<()>().await;
                continue;
            };
            match self.live.get(&report.kind) {
                Some((id, _)) if *id == report.id => {
                    if let Some((_, token)) = self.live.remove(&report.kind) {
                        token.cancel();
                    }
                    return report;
                }
                _ => debug!(subject = %self.subject, kind = %report.kind, id = report.id, "dropping stale report"),
            }
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, (_, token)) in self.live.drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_kinds_never_rearm() {
        let root = CancellationToken::new();
        let mut t = Triggers::new(Address::repeat(1), &root, 4);
        let first = t.arm_once(EventKind::TriggerCloseBids).unwrap();
        assert!(t.cancel(EventKind::TriggerCloseBids));
        assert!(first.is_stale());
        assert!(t.arm_once(EventKind::TriggerCloseBids).is_none());
        assert!(t.was_armed(EventKind::TriggerCloseBids));
    }

    #[tokio::test]
    async fn stale_reports_are_dropped() {
        let root = CancellationToken::new();
        let mut t = Triggers::new(Address::repeat(1), &root, 4);
        let old = t.rearm(EventKind::TriggerCrank, Address::repeat(1));
        let new = t.rearm(EventKind::TriggerCrank, Address::repeat(1));
        assert!(old.is_stale());

        old.report(Ok(())).await;
        new.report(Ok(())).await;
        let report = t.next_report().await;
        assert_eq!(report.id, new.id());
        assert!(new.is_stale());
        assert!(!t.is_live(EventKind::TriggerCrank));
    }
}
