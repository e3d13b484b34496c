//! # pipesync
//!
//! **pipesync** keeps an in-memory mirror of a bandwidth marketplace's
//! on-chain accounts (pipelines, payouts, receipts, stakers, validators) and
//! drives each account through its lifecycle by raising triggers for the
//! on-chain actions that are due.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   node feed (AccountUpdate)            slot feed (u64)
//!            │                                 │
//!            ▼                                 ▼
//! ┌────────────────────────┐          ┌─────────────────┐
//! │ Router (single actor)  │          │ SlotClock       │
//! │ - address → object     │          │ Hub<u64> Latest │
//! │ - unmatched children   │          └────────┬────────┘
//! │ - creation hubs        │                   │
//! └──────┬─────────────────┘                   │
//!        │ create / update / close             │
//!        ▼                                     │
//! ┌────────────────────────┐   data hubs       │
//! │ object actors          ├──────────┐        │
//! │ Pipeline Payout ...    │          ▼        ▼
//! └────────────────────────┘   ┌──────────────────────────┐
//!        creation hubs ───────►│ Registry                 │
//!                              │ one scheduler per object │
//!                              └────────────┬─────────────┘
//!                                           │ Event history (Retain::All)
//!                                           ▼
//!                              ┌──────────────────────────┐
//!                              │ TriggerDispatcher        │──► Executor
//!                              │ dispatch() retry loop    │◄── result
//!                              └────────────┬─────────────┘
//!                                           │ Trigger::report
//!                                           └──► scheduler
//!
//!  every component ── Notice ──► Bus ──► ObserverSet ──► LogWriter / user observers
//! ```
//!
//! ### Payout lifecycle
//! ```text
//! PreStart ─► TriggerValidatorSetPayout (until a validator joins)
//! PeriodStart ─► TriggerCrank (repeats until bids are final)
//! BidFinal
//! PeriodFinish ─► TriggerCloseBids (until bids close)
//! BidClosed + DelayClosePayout + ValidatorHaveWithdrawn ─► TriggerClosePayout (once, terminal)
//! ```
//!
//! ## Features
//! | Area           | Description                                              | Key types                                  |
//! |----------------|----------------------------------------------------------|--------------------------------------------|
//! | **Hubs**       | Typed fan-out with history replay                        | [`Hub`], [`Subscription`], [`Retain`]      |
//! | **Router**     | Single owner of every object, forward references         | [`Router`], [`Object`]                     |
//! | **Schedulers** | Per-object lifecycle events and triggers                 | [`Scheduler`], [`Event`], [`Trigger`]      |
//! | **Dispatch**   | Bounded retries of external actions                      | [`dispatch()`], [`RetryPolicy`], [`Executor`] |
//! | **Observers**  | Runtime notices for logging and monitoring               | [`Observe`], [`Notice`]                    |
//! | **Engine**     | Wiring, OS signals, graceful shutdown                    | [`Engine`], [`EngineConfig`]               |
//!
//! ## Optional features
//! - `logging` (default): the built-in [`LogWriter`] observer, added to every engine.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use pipesync::{ActionRequest, Engine, EngineConfig, ExecutorFn};
//! use pipesync::logging::{LogFormat, init_logging};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging(LogFormat::Human, "info");
//!     let cfg = EngineConfig::from_toml_str("grace_ms = 5000")?;
//!
//!     let executor = ExecutorFn::arc(|req: ActionRequest, _ctx: CancellationToken| async move {
//!         // build and submit the transaction for `req.kind` on `req.subject`
//!         let _ = req;
//!         Ok(())
//!     });
//!
//!     let engine = Engine::builder(cfg).with_executor(executor).build().await?;
//!     // Feed `engine.ingest(update)` and `engine.advance(slot)` from the node client.
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod hub;
pub mod logging;
pub mod model;
pub mod objects;
pub mod observers;
pub mod router;
pub mod scheduler;

pub use crate::clock::SlotClock;
pub use crate::config::EngineConfig;
pub use crate::core::{Engine, EngineBuilder};
pub use crate::dispatch::{
    ActionRequest, Executor, ExecutorFn, JitterPolicy, RetryPolicy, TriggerDispatcher, dispatch,
};
pub use crate::error::{
    ActionError, DispatchError, HubError, RouterError, RuntimeError, SchedulerError,
};
pub use crate::events::{Bus, Notice, NoticeKind};
pub use crate::hub::{Hub, Retain, Subscription};
pub use crate::model::{AccountPayload, AccountUpdate, Address, Kind, Period};
pub use crate::observers::{Observe, ObserverSet};
pub use crate::router::{Object, Router};
pub use crate::scheduler::{Event, EventKind, PipelineScheduler, Scheduler, Trigger};

#[cfg(feature = "logging")]
pub use crate::observers::LogWriter;
