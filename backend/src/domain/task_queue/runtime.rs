//! Retry timing helpers for the task processor.

use std::time::Duration;

use rand::Rng;

/// Jitter strategy applied to retry delays.
pub trait BackoffJitter: Send + Sync {
    /// Return the delay to use for `base` on the given retry.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use ledger::domain::task_queue::BackoffJitter;
    ///
    /// struct NoJitter;
    ///
    /// impl BackoffJitter for NoJitter {
    ///     fn jittered_delay(&self, base: Duration, _retry: u32) -> Duration {
    ///         base
    ///     }
    /// }
    ///
    /// assert_eq!(NoJitter.jittered_delay(Duration::from_secs(2), 1), Duration::from_secs(2));
    /// ```
    fn jittered_delay(&self, base: Duration, retry: u32) -> Duration;
}

/// Adds up to a quarter of the base delay, drawn uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _retry: u32) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

/// Exponential delay before retry number `retry` (1-based), capped at `max`.
pub(super) fn retry_base_delay(initial: Duration, max: Duration, retry: u32) -> Duration {
    let exponent = 2_u64.saturating_pow(retry.saturating_sub(1));
    let base_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(exponent).min(max_ms))
}
