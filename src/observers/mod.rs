//! Observers of the runtime notice bus.
//!
//! ```text
//! router / schedulers / dispatch ── publish ──► Bus ──► listener ──► ObserverSet
//!                                                                      ├─► LogWriter
//!                                                                      └─► user Observe impls
//! ```
//!
//! Observers are for monitoring only; the engine never waits on them.

#[cfg(feature = "logging")]
mod log;
mod observe;
mod set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use observe::Observe;
pub use set::ObserverSet;
