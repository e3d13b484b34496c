use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::engine::Engine;
use super::registry::Registry;
use crate::clock::SlotClock;
use crate::config::EngineConfig;
use crate::dispatch::{ExecutorRef, NoopExecutor, TriggerDispatcher};
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::observers::{Observe, ObserverSet};
use crate::router::Router;
use crate::scheduler::Context;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    cfg: EngineConfig,
    observers: Vec<Arc<dyn Observe>>,
    executor: Option<ExecutorRef>,
}

impl EngineBuilder {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            observers: Vec::new(),
            executor: None,
        }
    }

    /// Sets the observers fed from the runtime notice bus.
    ///
    /// With the `logging` feature a [`LogWriter`](crate::observers::LogWriter)
    /// is always added.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observe>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sets the executor that carries out triggered actions.
    pub fn with_executor(mut self, executor: ExecutorRef) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Spawns the engine's actors.
    ///
    /// Must be called inside a tokio runtime. Fails only if the router closes
    /// before the registry subscribed to it.
    pub async fn build(self) -> Result<Engine, RuntimeError> {
        let cfg = self.cfg;
        let buffer = cfg.hub_buffer_clamped();
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let token = CancellationToken::new();

        let mut observers = self.observers;
        #[cfg(feature = "logging")]
        observers.push(Arc::new(crate::observers::LogWriter));
        ObserverSet::new(observers, bus.clone()).spawn_listener(bus.subscribe());

        let clock = SlotClock::spawn(buffer, &token);
        let (router, router_task) = Router::spawn(buffer, bus.clone(), &token);

        let executor = self.executor.unwrap_or_else(|| {
            warn!("no executor configured; triggers will be acknowledged without action");
            Arc::new(NoopExecutor)
        });
        let dispatcher = TriggerDispatcher::new(executor, cfg.dispatch.retry_policy(), bus.clone());
        let ctx = Context::new(clock.clone(), router.clone(), bus.clone(), buffer, &token);
        let registry = Registry::new(ctx, dispatcher, cfg.payout, cfg.pipeline);
        registry.start().await?;

        info!(grace = ?cfg.grace(), buffer, "engine started");
        Ok(Engine {
            cfg,
            bus,
            clock,
            router,
            registry,
            token,
            router_task: Mutex::new(Some(router_task)),
        })
    }
}
