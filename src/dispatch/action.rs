//! # External actions and the executor seam.
//!
//! A trigger asks for an on-chain action; an [`Executor`] builds and submits
//! it. The engine only sees the outcome of each attempt.
//!
//! ```rust
//! use pipesync::dispatch::{ActionRequest, Executor, ExecutorFn};
//! use pipesync::error::ActionError;
//! use tokio_util::sync::CancellationToken;
//!
//! let exec = ExecutorFn::arc(|req: ActionRequest, _ctx: CancellationToken| async move {
//!     if req.slot == 0 {
//!         return Err(ActionError::fail("slot unknown"));
//!     }
//!     Ok(())
//! });
//! # let _ = exec;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ActionError;
use crate::model::Address;
use crate::scheduler::EventKind;

/// What a trigger asks the executor to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    /// Trigger kind, e.g. [`EventKind::TriggerCrank`].
    pub kind: EventKind,
    /// Account the action targets.
    pub subject: Address,
    /// Slot at which the trigger was raised.
    pub slot: u64,
}

/// Builds and submits actions.
///
/// `ctx` is cancelled when the trigger goes stale or the attempt times out.
/// Implementations should return [`ActionError::Canceled`] when they notice.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, req: &ActionRequest, ctx: CancellationToken) -> Result<(), ActionError>;
}

/// Shared executor handle.
pub type ExecutorRef = Arc<dyn Executor>;

/// Closure-backed [`Executor`]; every call produces a fresh future.
pub struct ExecutorFn<F> {
    f: F,
}

impl<F> ExecutorFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Executor for ExecutorFn<F>
where
    F: Fn(ActionRequest, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    async fn execute(&self, req: &ActionRequest, ctx: CancellationToken) -> Result<(), ActionError> {
        (self.f)(*req, ctx).await
    }
}

/// Executor that accepts every action without doing anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    async fn execute(&self, _req: &ActionRequest, _ctx: CancellationToken) -> Result<(), ActionError> {
        Ok(())
    }
}
