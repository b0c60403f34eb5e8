//! Retry budgets and backoff
//!
//! - [`RetryConfig`] bounds how often one chunk is re-run with fresh
//!   watermarks before the failure escalates to [`CdcError::Fatal`].
//! - [`ExponentialBackoff`] paces log client reconnects.
//!
//! Whether an error is worth retrying at all is decided by
//! [`CdcError::is_retriable`]; this module only decides how often and when.

use crate::common::CdcError;
use std::time::Duration;

/// Retry budget for chunk-scoped failures.
///
/// # Example
///
/// ```rust
/// use rivven_cdc_core::common::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::builder()
///     .max_retries(5)
///     .retry_delay(Duration::from_millis(50))
///     .max_delay(Duration::from_secs(2))
///     .build();
///
/// assert_eq!(config.max_retries(), 5);
/// assert!(config.should_retry(4));
/// assert!(!config.should_retry(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying
    max_retries: u32,
    /// Base delay before exponential growth
    retry_delay: Duration,
    /// Delay cap
    max_delay: Duration,
    /// Jitter factor (0.0 - 1.0)
    jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Fail on the first error.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Total attempts a chunk gets, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a chunk that already retried `retries` times may retry again.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Whether `error` on retry number `retries` warrants another attempt.
    pub fn should_retry_error(&self, error: &CdcError, retries: u32) -> bool {
        error.is_retriable() && self.should_retry(retries)
    }

    /// Backoff before retry number `retry` (0-based), capped and jittered.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)));
        let capped = base.min(self.max_delay);

        if self.jitter > 0.0 {
            // Deterministic spread so tests stay reproducible
            let spread = capped.as_secs_f64() * self.jitter;
            let offset = (retry as f64 * 0.618033988749895) % 1.0;
            let adjusted = capped.as_secs_f64() + spread * (offset * 2.0 - 1.0);
            Duration::from_secs_f64(adjusted.max(0.0))
        } else {
            capped
        }
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter: Option<f64>,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = Some(value);
        self
    }

    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = Some(value);
        self
    }

    pub fn max_delay(mut self, value: Duration) -> Self {
        self.max_delay = Some(value);
        self
    }

    /// Set jitter factor, clamped to 0.0 - 1.0.
    pub fn jitter(mut self, value: f64) -> Self {
        self.jitter = Some(value.clamp(0.0, 1.0));
        self
    }

    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

// ============================================================================
// Exponential Backoff
// ============================================================================

/// Stateful exponential backoff.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Next delay; doubles each call until `max`.
    pub fn next_backoff(&mut self) -> Duration {
        let backoff = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt.min(16)));
        self.attempt += 1;
        backoff.min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.max_attempts(), 4);
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn test_retry_disabled() {
        let config = RetryConfig::disabled();
        assert_eq!(config.max_attempts(), 1);
        assert!(!config.should_retry(0));
    }

    #[test]
    fn test_should_retry_error_respects_error_class() {
        let config = RetryConfig::default();
        assert!(config.should_retry_error(&CdcError::transient("reset"), 0));
        assert!(config.should_retry_error(&CdcError::consistency("hi < lo"), 0));
        assert!(!config.should_retry_error(&CdcError::config("bad"), 0));
        assert!(!config.should_retry_error(&CdcError::transient("reset"), 3));
    }

    #[test]
    fn test_delay_without_jitter_doubles_and_caps() {
        let config = RetryConfig::builder()
            .retry_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .jitter(0.0)
            .build();

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_band() {
        let config = RetryConfig::builder()
            .retry_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .jitter(0.5)
            .build();

        for retry in 0..6 {
            let nominal = 100.0 * 2f64.powi(retry as i32);
            let ms = config.delay_for_attempt(retry).as_secs_f64() * 1000.0;
            assert!(ms >= nominal * 0.5 - 1e-6 && ms <= nominal * 1.5 + 1e-6);
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(40));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(50));
        assert_eq!(backoff.attempt(), 4);

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
    }
}
