//! Retry utilities: backoff builders and retry helpers.
//!
//! Uses `backon` for exponential backoff with jitter. Shard workers build
//! their policy from `RetryConfig`; the helpers here cover the fixed
//! policies used outside the worker pipeline.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Backoff for storage connection attempts at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Per-attempt retry bookkeeping over a backon policy.
///
/// Unlike `Retryable`, the caller owns the loop, so it can record each
/// failure and race every delay against a stop signal.
pub struct RetryBudget {
    backoff: <ExponentialBuilder as BackoffBuilder>::Backoff,
    attempts: usize,
}

impl RetryBudget {
    pub fn new(builder: ExponentialBuilder) -> Self {
        Self {
            backoff: builder.build(),
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.backoff.next()?;
        self.attempts += 1;
        Some(delay)
    }

    /// Retries granted so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
