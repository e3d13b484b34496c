//! # Scheduler registry: one scheduler and dispatcher per live object.
//!
//! The registry subscribes to every router creation hub. Each announced
//! object gets its scheduler and a [`TriggerDispatcher`] following that
//! scheduler's history. A scheduler is forgotten once it finishes.
//!
//! ```text
//! Router creation hubs ──► Registry listener
//!   on_pipeline ─► spawn_pipeline ─┐
//!   on_payout   ─► spawn_payout   ─┤
//!   on_receipt  ─► spawn_receipt  ─┼─► Entry{scheduler, task} ─► TriggerDispatcher
//!   on_staker   ─► spawn_staker   ─┤            │
//!   on_validator─► spawn_validator─┘            └─ finished() ─► forget(address, id)
//! ```
//!
//! ## Rules
//! - Keys are object addresses. A re-created object replaces the old entry;
//!   a late `forget` from the old scheduler does not remove the new one.
//! - The listener subscribes before [`Registry::start`] returns, so no object
//!   created afterwards is missed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PayoutConfig, PipelineConfig};
use crate::dispatch::TriggerDispatcher;
use crate::error::HubError;
use crate::model::Address;
use crate::scheduler::{
    Context, PipelineScheduler, Scheduler, SchedulerTask, spawn_payout, spawn_pipeline,
    spawn_receipt, spawn_staker, spawn_validator,
};

struct Entry {
    id: u64,
    scheduler: Scheduler,
    pipeline: Option<PipelineScheduler>,
    task: Option<SchedulerTask>,
}

/// Live schedulers keyed by object address.
pub(crate) struct Registry {
    entries: RwLock<HashMap<Address, Entry>>,
    next_id: AtomicU64,
    ctx: Context,
    dispatcher: TriggerDispatcher,
    payout: PayoutConfig,
    pipeline: PipelineConfig,
}

impl Registry {
    pub(crate) fn new(
        ctx: Context,
        dispatcher: TriggerDispatcher,
        payout: PayoutConfig,
        pipeline: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            ctx,
            dispatcher,
            payout,
            pipeline,
        })
    }

    /// Subscribes to the creation hubs and spawns the listener.
    ///
    /// The listener ends when the router closes its hubs or the engine stops.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, HubError> {
        let router = &self.ctx.router;
        let mut pipelines = router.on_pipeline().await?;
        let mut payouts = router.on_payout().await?;
        let mut receipts = router.on_receipt().await?;
        let mut stakers = router.on_staker().await?;
        let mut validators = router.on_validator().await?;

        let me = Arc::clone(self);
        let token = self.ctx.token.clone();
        Ok(tokio::spawn(async move {
            let res: Result<(), HubError> = async {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        p = pipelines.recv() => match p? {
                            Some(p) => {
                                let (sched, task) = spawn_pipeline(&me.ctx, p, me.pipeline);
                                let handle = sched.handle().clone();
                                me.track(handle, task, Some(sched)).await;
                            }
                            None => break,
                        },
                        p = payouts.recv() => match p? {
                            Some(p) => {
                                let (sched, task) = spawn_payout(&me.ctx, p, me.payout);
                                me.track(sched, task, None).await;
                            }
                            None => break,
                        },
                        r = receipts.recv() => match r? {
                            Some(r) => {
                                let (sched, task) = spawn_receipt(&me.ctx, r);
                                me.track(sched, task, None).await;
                            }
                            None => break,
                        },
                        s = stakers.recv() => match s? {
                            Some(s) => {
                                let (sched, task) = spawn_staker(&me.ctx, s);
                                me.track(sched, task, None).await;
                            }
                            None => break,
                        },
                        v = validators.recv() => match v? {
                            Some(v) => {
                                let (sched, task) = spawn_validator(&me.ctx, v);
                                me.track(sched, task, None).await;
                            }
                            None => break,
                        },
                    }
                }
                Ok(())
            }
            .await;
            match res {
                Ok(()) => debug!("registry listener stopped"),
                Err(e) => warn!(error = %e, label = e.as_label(), "registry listener lost a creation hub"),
            }
        }))
    }

    async fn track(
        self: &Arc<Self>,
        scheduler: Scheduler,
        task: SchedulerTask,
        pipeline: Option<PipelineScheduler>,
    ) {
        let address = scheduler.address();
        match scheduler.subscribe().await {
            Ok(history) => {
                self.dispatcher.spawn(history, &self.ctx.token);
            }
            Err(e) => debug!(%address, error = %e, "scheduler ended before its dispatcher attached"),
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            scheduler: scheduler.clone(),
            pipeline,
            task: Some(task),
        };
        if let Some(prev) = self.entries.write().await.insert(address, entry) {
            debug!(%address, prev = prev.id, id, "scheduler replaced");
            prev.scheduler.stop();
        }
        info!(object = %scheduler.object(), %address, "scheduler registered");

        let me = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.finished().await;
            me.forget(address, id).await;
        });
    }

    /// Removes the entry of `address` if it is still scheduler `id`.
    async fn forget(&self, address: Address, id: u64) {
        let entry = {
            let mut entries = self.entries.write().await;
            match entries.get(&address) {
                Some(e) if e.id == id => entries.remove(&address),
                _ => None,
            }
        };
        let Some(task) = entry.and_then(|mut e| e.task.take()) else {
            return;
        };
        match task.await {
            Ok(Ok(())) => debug!(%address, "scheduler forgotten"),
            Ok(Err(e)) => debug!(%address, error = %e, "failed scheduler forgotten"),
            Err(e) => warn!(%address, error = %e, "scheduler task panicked"),
        }
    }

    pub(crate) async fn get(&self, address: &Address) -> Option<Scheduler> {
        self.entries
            .read()
            .await
            .get(address)
            .map(|e| e.scheduler.clone())
    }

    pub(crate) async fn pipeline(&self, address: &Address) -> Option<PipelineScheduler> {
        self.entries
            .read()
            .await
            .get(address)
            .and_then(|e| e.pipeline.clone())
    }

    /// Sorted `kind:address` labels of the registered schedulers.
    pub(crate) async fn list(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.values().map(|e| label(&e.scheduler)).collect();
        names.sort_unstable();
        names
    }

    /// Waits up to `grace` for every registered scheduler to finish.
    ///
    /// Returns the labels of the ones still running on timeout.
    pub(crate) async fn wait_all(&self, grace: Duration) -> Result<(), Vec<String>> {
        let schedulers: Vec<Scheduler> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.scheduler.clone())
            .collect();
        let done = futures::future::join_all(schedulers.iter().map(|s| s.finished()));
        if tokio::time::timeout(grace, done).await.is_ok() {
            return Ok(());
        }
        let mut stuck: Vec<String> = schedulers
            .iter()
            .filter(|s| !s.is_finished())
            .map(label)
            .collect();
        stuck.sort_unstable();
        Err(stuck)
    }
}

fn label(s: &Scheduler) -> String {
    format!("{}:{}", s.object(), s.address())
}
