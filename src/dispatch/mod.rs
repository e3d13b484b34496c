//! Trigger dispatch: bounded retries of external actions.
//!
//! ## Contents
//! - [`dispatch`] retry wrapper returning a derived cancellation token
//! - [`RetryPolicy`], [`JitterPolicy`] delays between attempts
//! - [`Executor`], [`ExecutorFn`], [`ActionRequest`] the action seam
//! - [`TriggerDispatcher`] glue between a scheduler's history and the executor
//!
//! ## Error mapping
//! | attempt result          | dispatch outcome                    |
//! |-------------------------|-------------------------------------|
//! | `Ok`                    | `Ok`                                |
//! | `Fail` / `Timeout`      | retried, then `Exhausted`           |
//! | `Fatal`                 | `Fatal`, no retry                   |
//! | `Canceled` / stale      | `Canceled` (success by irrelevance) |

mod action;
mod jitter;
mod retry;
mod runner;
mod trigger;

pub use action::{ActionRequest, Executor, ExecutorFn, ExecutorRef, NoopExecutor};
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
pub use runner::{Origin, dispatch};
pub use trigger::TriggerDispatcher;
