//! Daemon tuning configuration.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;

use super::ConfigError;

/// Default events per range.
pub const DEFAULT_BATCH_SIZE: i64 = 500;
/// Default bound on events in flight per shard.
pub const DEFAULT_MAXIMUM_HOPPER_SIZE: i64 = 2500;
/// Default grace period before a gap is treated as permanent.
pub const DEFAULT_STALE_SEQUENCE_THRESHOLD_MS: u64 = 3000;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Per-shard batch and hopper sizes.
    pub options: AsyncOptions,
    /// High-water tracker polling and gap handling.
    pub high_water: HighWaterConfig,
    /// Projection failure policy.
    pub errors: ErrorHandlingConfig,
    /// Backoff for transient storage faults.
    pub retry: RetryConfig,
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.options.validate()?;
        if self.high_water.fast_polling_ms == 0 || self.high_water.slow_polling_ms == 0 {
            return Err(ConfigError::Invalid(
                "high_water polling intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-shard flow control.
///
/// The hopper is the sliding window of events dispatched but not yet
/// committed; ranges are at most `batch_size` events wide.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AsyncOptions {
    /// Maximum range width.
    ///
    /// Default: 500.
    pub batch_size: i64,

    /// Maximum total width of a shard's outstanding ranges.
    ///
    /// Default: 2,500.
    pub maximum_hopper_size: i64,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            maximum_hopper_size: DEFAULT_MAXIMUM_HOPPER_SIZE,
        }
    }
}

impl AsyncOptions {
    pub fn new(batch_size: i64, maximum_hopper_size: i64) -> Self {
        Self {
            batch_size,
            maximum_hopper_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size <= 0 {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.maximum_hopper_size <= 0 {
            return Err(ConfigError::Invalid(format!(
                "maximum_hopper_size must be positive, got {}",
                self.maximum_hopper_size
            )));
        }
        Ok(())
    }
}

/// High-water tracker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HighWaterConfig {
    /// How long a gap may stay open before it is skipped as permanent.
    ///
    /// Not checked against clock skew between writers. Thresholds shorter
    /// than the worst-case commit latency of the event store will skip
    /// events that were merely slow to commit.
    ///
    /// Default: 3,000 ms.
    pub stale_sequence_threshold_ms: u64,

    /// Poll interval while behind or waiting on a gap.
    ///
    /// Default: 250 ms.
    pub fast_polling_ms: u64,

    /// Poll interval when caught up or after a gateway error.
    ///
    /// Default: 1,000 ms.
    pub slow_polling_ms: u64,

    /// Persist the mark so a restart does not re-wait on skipped gaps.
    ///
    /// Default: true.
    pub persist_mark: bool,
}

impl Default for HighWaterConfig {
    fn default() -> Self {
        Self {
            stale_sequence_threshold_ms: DEFAULT_STALE_SEQUENCE_THRESHOLD_MS,
            fast_polling_ms: 250,
            slow_polling_ms: 1000,
            persist_mark: true,
        }
    }
}

impl HighWaterConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_sequence_threshold_ms)
    }

    pub fn fast_polling(&self) -> Duration {
        Duration::from_millis(self.fast_polling_ms)
    }

    pub fn slow_polling(&self) -> Duration {
        Duration::from_millis(self.slow_polling_ms)
    }
}

/// What to do when a projection rejects an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyErrorPolicy {
    /// Abort the range and put the shard in `Errored`.
    #[default]
    Stop,
    /// Dead-letter the event and keep going.
    SkipEvent,
}

/// Projection failure handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// Policy for business-logic failures.
    pub apply_error_policy: ApplyErrorPolicy,

    /// Dead-letter undecodable events and continue. When false, the shard
    /// commits up to the poison event and stops in `Errored`.
    ///
    /// Default: true.
    pub skip_serialization_errors: bool,

    /// How long a shard stays `Paused` after exhausting retries.
    ///
    /// Default: 5,000 ms.
    pub pause_ms: u64,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            apply_error_policy: ApplyErrorPolicy::Stop,
            skip_serialization_errors: true,
            pause_ms: 5000,
        }
    }
}

impl ErrorHandlingConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Backoff for transient faults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 5000,
            max_retries: 5,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}
