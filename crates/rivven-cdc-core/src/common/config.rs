//! Capture configuration
//!
//! | Option | Default | Meaning |
//! |--------|---------|---------|
//! | `chunk_size` | 8096 | target rows per chunk |
//! | `parallelism` | 4 | concurrent chunk workers |
//! | `split_strategy` | `Auto` | how chunk boundaries are chosen |
//! | `distribution_factor_lower` / `_upper` | 0.05 / 1000.0 | even-range split window |
//! | `require_primary_key` | false | reject keyless tables instead of falling back to one chunk |
//! | `retry` | 3 retries | per-chunk retry budget |
//! | `watermark_timeout` | 30s | wait for the log reader to reach a high watermark |
//! | `output_buffer` | 1024 | bounded event channel capacity |
//! | `stop_timeout` | 10s | bound on graceful stop |
//! | `log_reconnect_attempts` | 5 | log client reopen attempts before failing |

use crate::common::{CdcError, Result, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How chunk boundaries are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Even ranges for dense integer keys, sampled boundaries otherwise
    #[default]
    Auto,
    /// Equal-width key ranges between min and max (integer keys only)
    EvenRange,
    /// Percentile probes of the key distribution
    Sampled,
}

/// Configuration for one table capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target rows per chunk
    pub chunk_size: usize,
    /// Concurrent chunk workers
    pub parallelism: usize,
    pub split_strategy: SplitStrategy,
    /// Lower bound of the key distribution factor for even-range splitting
    pub distribution_factor_lower: f64,
    /// Upper bound of the key distribution factor for even-range splitting
    pub distribution_factor_upper: f64,
    /// Fail keyless tables instead of snapshotting them as one chunk
    pub require_primary_key: bool,
    /// Per-chunk retry budget
    pub retry: RetryConfig,
    /// How long a chunk waits for the log reader to reach its high watermark
    pub watermark_timeout: Duration,
    /// Capacity of the output event channel
    pub output_buffer: usize,
    /// Bound on graceful stop
    pub stop_timeout: Duration,
    /// Log client reopen attempts before the capture fails
    pub log_reconnect_attempts: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8096,
            parallelism: 4,
            split_strategy: SplitStrategy::Auto,
            distribution_factor_lower: 0.05,
            distribution_factor_upper: 1000.0,
            require_primary_key: false,
            retry: RetryConfig::default(),
            watermark_timeout: Duration::from_secs(30),
            output_buffer: 1024,
            stop_timeout: Duration::from_secs(10),
            log_reconnect_attempts: 5,
        }
    }
}

impl CaptureConfig {
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }

    /// Reject settings no capture can run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CdcError::config("chunk_size must be greater than 0"));
        }
        if self.parallelism == 0 {
            return Err(CdcError::config("parallelism must be greater than 0"));
        }
        if self.output_buffer == 0 {
            return Err(CdcError::config("output_buffer must be greater than 0"));
        }
        if self.distribution_factor_lower.is_nan() || self.distribution_factor_lower <= 0.0 {
            return Err(CdcError::config(
                "distribution_factor_lower must be positive",
            ));
        }
        if self.distribution_factor_upper < self.distribution_factor_lower {
            return Err(CdcError::config(format!(
                "distribution factor bounds inverted: lower {} > upper {}",
                self.distribution_factor_lower, self.distribution_factor_upper
            )));
        }
        if self.watermark_timeout.is_zero() {
            return Err(CdcError::config("watermark_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Default)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn parallelism(mut self, workers: usize) -> Self {
        self.config.parallelism = workers;
        self
    }

    pub fn split_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.config.split_strategy = strategy;
        self
    }

    /// Set the even-range distribution factor window.
    pub fn distribution_factor(mut self, lower: f64, upper: f64) -> Self {
        self.config.distribution_factor_lower = lower;
        self.config.distribution_factor_upper = upper;
        self
    }

    pub fn require_primary_key(mut self, required: bool) -> Self {
        self.config.require_primary_key = required;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn watermark_timeout(mut self, timeout: Duration) -> Self {
        self.config.watermark_timeout = timeout;
        self
    }

    pub fn output_buffer(mut self, capacity: usize) -> Self {
        self.config.output_buffer = capacity;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn log_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.log_reconnect_attempts = attempts;
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<CaptureConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
