//! # Jitter applied to retry delays.
//!
//! Many schedulers reach the same slot boundary together and raise their
//! triggers in the same instant. Jitter spreads their retries apart.
//!
//! - [`JitterPolicy::None`] exact delays
//! - [`JitterPolicy::Full`] random in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`] random in `[base, prev * 3]`, capped

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Randomization of retry delays.
///
/// Deserialized from the lowercase names `none`, `full`, `equal` and
/// `decorrelated`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    #[default]
    None,
    Full,
    Equal,
    /// Needs the previous delay; see [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to `delay`. `Decorrelated` returns it unchanged.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => full(delay),
            JitterPolicy::Equal => equal(delay),
        }
    }

    /// Decorrelated jitter: random in `[base, min(prev * 3, max)]`.
    ///
    /// Other policies fall back to `apply(prev)`.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if *self != JitterPolicy::Decorrelated {
            return self.apply(prev);
        }
        let base_ms = base.as_millis() as u64;
        let upper = (prev.as_millis() as u64)
            .saturating_mul(3)
            .min(max.as_millis() as u64)
            .max(base_ms);
        if base_ms >= upper {
            return base;
        }
        Duration::from_millis(rand::rng().random_range(base_ms..=upper))
    }
}

fn full(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

fn equal(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return delay;
    }
    Duration::from_millis(half + rand::rng().random_range(0..=half))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_and_zero_delays_pass_through() {
        let d = Duration::from_millis(300);
        assert_eq!(JitterPolicy::None.apply(d), d);
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn equal_keeps_at_least_half() {
        let d = Duration::from_millis(1000);
        for _ in 0..100 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(500) && j <= d, "{j:?}");
        }
    }

    #[test]
    fn decorrelated_stays_within_bounds() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        for _ in 0..100 {
            let j = JitterPolicy::Decorrelated.apply_decorrelated(base, Duration::from_secs(1), max);
            assert!(j >= base && j <= max, "{j:?}");
        }
        // prev * 3 below base collapses to base.
        assert_eq!(
            JitterPolicy::Decorrelated.apply_decorrelated(base, Duration::from_millis(10), max),
            base
        );
    }

    #[test]
    fn parses_lowercase_names() {
        #[derive(Deserialize)]
        struct Doc {
            jitter: JitterPolicy,
        }
        let doc: Doc = toml::from_str(r#"jitter = "decorrelated""#).unwrap();
        assert_eq!(doc.jitter, JitterPolicy::Decorrelated);
        assert!(toml::from_str::<Doc>(r#"jitter = "Full""#).is_err());
    }
}
