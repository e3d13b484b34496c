//! Runtime notices: types and broadcast bus.
//!
//! ## Contents
//! - [`NoticeKind`], [`Notice`] classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: router, schedulers, `dispatch`, observer workers (overflow/panic),
//!   engine shutdown.
//! - **Consumers**: the engine's observer listener, which fans out to `ObserverSet`.

mod bus;
mod notice;

pub use bus::Bus;
pub use notice::{Notice, NoticeKind};
