//! # Engine configuration.
//!
//! Provides [`EngineConfig`], the centralized settings of the synchronization engine.
//! Every field has a default, so a TOML file only needs the values it overrides:
//!
//! ```toml
//! grace_ms = 10000
//! hub_buffer = 32
//!
//! [payout]
//! post_finish_delay = 100
//!
//! [dispatch]
//! max_tries = 8
//! jitter = "equal"
//! ```
//!
//! ## Sentinel values
//! - `dispatch.attempt_timeout_ms = 0` → no per-attempt timeout
//! - `hub_buffer = 0`, `bus_capacity = 0` → clamped to 1

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::{JitterPolicy, RetryPolicy};
use crate::error::RuntimeError;

/// Global configuration of the engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum time to wait for actors to stop on shutdown (milliseconds).
    pub grace_ms: u64,

    /// Ring size of the runtime notice bus.
    pub bus_capacity: usize,

    /// Per-subscription buffer of every broadcast hub.
    ///
    /// A full buffer blocks the hub owner until the consumer drains it, so keep
    /// consumers prompt rather than growing this value.
    pub hub_buffer: usize,

    pub payout: PayoutConfig,
    pub pipeline: PipelineConfig,
    pub dispatch: DispatchConfig,
}

/// Payout lifecycle thresholds, in slots.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// How far before `period.start` the validator-set trigger fires.
    pub pre_start_lookahead: u64,
    /// Slots after `period.finish` before the payout may be closed.
    pub post_finish_delay: u64,
}

/// Pipeline period-append thresholds, in slots.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Initial append lookahead of every pipeline scheduler.
    pub lookahead: u64,
}

/// Retry settings of the trigger dispatcher.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_tries: u32,
    pub attempt_timeout_ms: u64,
    pub first_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl EngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, RuntimeError> {
        toml::from_str(s).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[inline]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    #[inline]
    pub fn hub_buffer_clamped(&self) -> usize {
        self.hub_buffer.max(1)
    }
}

impl DispatchConfig {
    /// Per-attempt timeout; `None` when disabled.
    #[inline]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        match self.attempt_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Builds the retry policy used by [`dispatch`](crate::dispatch::dispatch).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries.max(1),
            first: Duration::from_millis(self.first_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
            jitter: self.jitter,
            timeout: self.attempt_timeout(),
        }
    }
}

impl Default for EngineConfig {
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `hub_buffer = 16`
    fn default() -> Self {
        Self {
            grace_ms: 60_000,
            bus_capacity: 1024,
            hub_buffer: 16,
            payout: PayoutConfig::default(),
            pipeline: PipelineConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            pre_start_lookahead: 50,
            post_finish_delay: 100,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { lookahead: 200 }
    }
}

impl Default for DispatchConfig {
    /// Five tries, 500ms doubling up to 30s, no jitter, no attempt timeout.
    fn default() -> Self {
        Self {
            max_tries: 5,
            attempt_timeout_ms: 0,
            first_delay_ms: 500,
            max_delay_ms: 30_000,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}
