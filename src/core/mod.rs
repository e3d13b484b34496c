//! Engine runtime: wiring, scheduler registry and shutdown.
//!
//! - [`Engine`] owns the bus, router, slot clock and scheduler registry.
//! - [`EngineBuilder`] configures observers and the action executor.
//! - `registry` spawns one scheduler and dispatcher per object.
//! - `shutdown` waits for OS termination signals.

mod builder;
mod engine;
mod registry;
mod shutdown;

pub use builder::EngineBuilder;
pub use engine::Engine;
