//! # Engine: wires the router, the slot clock and the schedulers together.
//!
//! ```text
//!   node feed ── ingest ──► Router ── creation hubs ──► Registry ──► schedulers
//!   slot feed ── advance ─► SlotClock ───────────────────────────────┘    │
//!                                                                          ▼
//!                                                     TriggerDispatcher ─► Executor
//!
//!   everything ── Notice ──► Bus ──► ObserverSet ──► LogWriter, user observers
//! ```
//!
//! ## Shutdown
//! ```text
//! OS signal / shutdown() / router exit
//!   └─► ShutdownRequested
//!   └─► root token cancelled (router, objects, schedulers, dispatches)
//!   └─► wait for every scheduler, bounded by grace:
//!         ├─ all stopped   → AllStoppedWithin
//!         └─ grace exceeded → GraceExceeded + RuntimeError::GraceExceeded{stuck}
//! ```
//!
//! A router that stops on a protocol error takes the engine down with it:
//! its state cannot be trusted and the caller must build a new engine.

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::builder::EngineBuilder;
use super::registry::Registry;
use super::shutdown;
use crate::clock::SlotClock;
use crate::config::EngineConfig;
use crate::error::{HubError, RouterError, RuntimeError};
use crate::events::{Bus, Notice, NoticeKind};
use crate::model::{AccountUpdate, Address};
use crate::router::Router;
use crate::scheduler::{PipelineScheduler, Scheduler};

/// Running synchronization engine.
pub struct Engine {
    pub(super) cfg: EngineConfig,
    pub(super) bus: Bus,
    pub(super) clock: SlotClock,
    pub(super) router: Router,
    pub(super) registry: std::sync::Arc<Registry>,
    pub(super) token: CancellationToken,
    pub(super) router_task: Mutex<Option<JoinHandle<Result<(), RouterError>>>>,
}

impl Engine {
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    /// Feeds one account update from the node.
    pub async fn ingest(&self, update: AccountUpdate) -> Result<(), RouterError> {
        self.router.update(update).await
    }

    /// Feeds the current slot; stale or repeated slots are ignored.
    pub async fn advance(&self, slot: u64) -> Result<(), HubError> {
        self.clock.advance(slot).await
    }

    /// Scheduler of the live object at `address`.
    pub async fn scheduler(&self, address: Address) -> Option<Scheduler> {
        self.registry.get(&address).await
    }

    /// Pipeline scheduler at `address`, for adjusting its lookahead.
    pub async fn pipeline_scheduler(&self, address: Address) -> Option<PipelineScheduler> {
        self.registry.pipeline(&address).await
    }

    /// Sorted `kind:address` labels of the running schedulers.
    pub async fn schedulers(&self) -> Vec<String> {
        self.registry.list().await
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn clock(&self) -> &SlotClock {
        &self.clock
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Runs until an OS signal, a call to [`shutdown`](Self::shutdown), or
    /// the router stopping.
    ///
    /// Returns the router's error if it stopped on one; the engine is shut
    /// down in every case.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let router_task = self.router_task.lock().await.take();
        let router_done = async {
            match router_task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => {
                res?;
                info!("termination signal received");
                self.shutdown().await
            }
            res = router_done => {
                let grace = self.shutdown().await;
                match res {
                    Ok(Ok(())) => grace,
                    Ok(Err(e)) => {
                        error!(error = %e, label = e.as_label(), "router failed; engine stopped");
                        Err(RuntimeError::Router(e))
                    }
                    Err(join) => {
                        error!(error = %join, "router task panicked");
                        Err(RuntimeError::Router(RouterError::Closed))
                    }
                }
            }
            _ = self.token.cancelled() => Ok(()),
        }
    }

    /// Stops every actor and waits for the schedulers, bounded by the grace
    /// period.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Notice::new(NoticeKind::ShutdownRequested));
        self.token.cancel();

        let grace = self.cfg.grace();
        match self.registry.wait_all(grace).await {
            Ok(()) => {
                info!("all schedulers stopped");
                self.bus.publish(Notice::new(NoticeKind::AllStoppedWithin));
                Ok(())
            }
            Err(stuck) => {
                warn!(?grace, ?stuck, "grace period exceeded");
                self.bus
                    .publish(Notice::new(NoticeKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Whether the engine has been shut down.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}
