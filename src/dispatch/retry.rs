//! # Retry policy of the trigger dispatcher.
//!
//! Retry `n` (0-indexed) waits `first × factor^n`, clamped to `max`, then
//! jittered. The base delay depends only on `n`, so jitter never compounds
//! across retries.
//!
//! ```rust
//! use std::time::Duration;
//! use pipesync::dispatch::{JitterPolicy, RetryPolicy};
//!
//! let policy = RetryPolicy {
//!     max_tries: 4,
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//!     timeout: None,
//! };
//! assert_eq!(policy.next(0), Duration::from_millis(100));
//! assert_eq!(policy.next(1), Duration::from_millis(200));
//! assert_eq!(policy.next(9), Duration::from_secs(1));
//! ```

use std::time::Duration;

use super::jitter::JitterPolicy;

/// Bounded retry with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub max_tries: u32,
    /// Delay before the first retry.
    pub first: Duration,
    /// Delay cap.
    pub max: Duration,
    /// Growth factor per retry.
    pub factor: f64,
    pub jitter: JitterPolicy,
    /// Per-attempt timeout; `None` lets an attempt run until it returns.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    /// Five tries, 500ms doubling up to 30s, no jitter, no attempt timeout.
    fn default() -> Self {
        Self {
            max_tries: 5,
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries `max_tries` times with a constant `delay`.
    pub fn constant(max_tries: u32, delay: Duration) -> Self {
        Self {
            max_tries,
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|d| !d.is_zero());
        self
    }

    /// Delay before retry `retry` (0 = the wait after the first failure).
    pub fn next(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            j => j.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(first_ms: u64, max: Duration, jitter: JitterPolicy) -> RetryPolicy {
        RetryPolicy {
            max_tries: 10,
            first: Duration::from_millis(first_ms),
            max,
            factor: 2.0,
            jitter,
            timeout: None,
        }
    }

    #[test]
    fn grows_exponentially_until_the_cap() {
        let p = exp(100, Duration::from_secs(1), JitterPolicy::None);
        let got: Vec<_> = (0..6).map(|n| p.next(n).as_millis()).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_cap_is_clamped() {
        let p = exp(10_000, Duration::from_secs(5), JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn constant_policy_never_grows() {
        let p = RetryPolicy::constant(3, Duration::from_millis(250));
        assert!((0..20).all(|n| p.next(n) == Duration::from_millis(250)));
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let p = exp(100, Duration::from_secs(30), JitterPolicy::Full);
        for n in 0..12 {
            let base = Duration::from_millis(100 * 2u64.pow(n)).min(Duration::from_secs(30));
            assert!(p.next(n) <= base);
        }
    }

    #[test]
    fn zero_timeout_means_none() {
        let p = RetryPolicy::default().with_timeout(Duration::ZERO);
        assert!(p.timeout.is_none());
        let p = p.with_timeout(Duration::from_secs(2));
        assert_eq!(p.timeout, Some(Duration::from_secs(2)));
    }
}
