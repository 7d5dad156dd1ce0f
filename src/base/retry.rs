//! Bounded retry for re-opening cookie stores.
//!
//! Browsers replace or lock their store files while writing, so a failed open
//! right after a change notification is retried a few times before the
//! source gives up.

use std::time::Duration;

/// How often, and how patiently, a store open is retried.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed open.
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    /// Upper bound for the doubled delay. Equal to `delay_ms` for a fixed delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::file_open()
    }
}

impl RetryConfig {
    /// Ten retries, one second apart.
    pub fn file_open() -> Self {
        Self { max_attempts: 10, delay_ms: 1000, max_delay_ms: 1000 }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self { max_attempts: 0, ..Self::file_open() }
    }

    /// 10 ms between attempts, for tests and stores on fast local disks.
    pub fn quick(max_attempts: usize) -> Self {
        Self { max_attempts, delay_ms: 10, max_delay_ms: 10 }
    }

    /// Total time spent sleeping before giving up.
    pub fn budget(&self) -> Duration {
        (1..=self.max_attempts).map(|attempt| calculate_backoff(attempt, self)).sum()
    }
}

/// Delay before retry number `attempt` (1-based); zero for attempt 0.
///
/// The delay doubles per attempt from `delay_ms` and never exceeds
/// `max_delay_ms`.
pub fn calculate_backoff(attempt: usize, config: &RetryConfig) -> Duration {
    let Some(doublings) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let factor = 1u64 << doublings.min(16);
    Duration::from_millis(config.delay_ms.saturating_mul(factor).min(config.max_delay_ms))
}

/// Whether another retry is allowed after `attempt` retries.
pub fn should_retry(attempt: usize, config: &RetryConfig) -> bool {
    attempt < config.max_attempts
}
