//! Broadcast hubs: typed fan-out with back-pressure-safe buffering.
//!
//! ## Contents
//! - [`Hub`] handle to a hub actor (`subscribe`, `broadcast`, `delete`, `close`)
//! - [`Subscription`] receiving end with a once-only close signal
//! - [`Retain`] what late subscribers are replayed
//!
//! ## Quick reference
//! - **Slot clock**: `Retain::Latest` (new subscribers learn the current slot).
//! - **Object data**: `Retain::Latest` (new subscribers learn the current account state).
//! - **Scheduler events**: `Retain::All` (late subscribers see the full history).
//! - **Router creation hubs**: `Retain::None`.
//!
//! A full subscription buffer stalls its hub until the reader drains it. Every
//! consumer in this crate reads its subscriptions from a dedicated task.

mod actor;
mod home;
mod subscription;

pub(crate) use actor::Request;
pub use actor::{Hub, Retain};
pub use subscription::Subscription;
