//! Retry policy: attempt-count normalization and exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coerce a configured attempt count into a usable one.
///
/// Zero or negative input becomes 1, so "no retries" never turns into
/// unbounded retries.
pub fn normalized_max_attempts(n: i64) -> u32 {
    if n <= 0 {
        1
    } else {
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Exponential backoff `base * 2^(attempt - 1)` clamped to `cap`.
///
/// A non-positive `base` disables backoff. A non-positive `cap` falls back to
/// `base`. Attempts below 1 are treated as the first attempt.
pub fn backoff_seconds(attempt: u32, base: f64, cap: f64) -> f64 {
    if !(base > 0.0) || !base.is_finite() {
        return 0.0;
    }
    let cap = if cap > 0.0 && cap.is_finite() { cap } else { base };
    let exponent = attempt.saturating_sub(1).min(1023) as i32;
    (base * 2f64.powi(exponent)).min(cap)
}

/// Retry settings passed explicitly into the components that retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total execution attempts allowed before a job is marked failed.
    pub max_attempts: u32,
    /// Delay before the second attempt, in seconds.
    pub backoff_base_secs: f64,
    /// Upper bound for any single delay, in seconds.
    pub backoff_cap_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 5.0,
            backoff_cap_secs: 300.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: i64, backoff_base_secs: f64, backoff_cap_secs: f64) -> Self {
        Self {
            max_attempts: normalized_max_attempts(max_attempts),
            backoff_base_secs,
            backoff_cap_secs,
        }
    }

    /// Attempt budget, never below 1.
    pub fn max_attempts(&self) -> u32 {
        normalized_max_attempts(i64::from(self.max_attempts))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts()
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = backoff_seconds(attempt, self.backoff_base_secs, self.backoff_cap_secs);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
