//! Dead letter infrastructure.
//!
//! Events a shard deliberately skips are recorded here, with enough
//! identity to find and replay them later:
//! - Shard identity and projection name
//! - Event sequence, type and stream
//! - Why it was skipped (undecodable payload or rejected by the projection)
//!
//! Writes are not part of the range's progress transaction. A range that
//! is retried after a failed commit may record the same dead letter twice.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::daemon::range::PoisonEvent;
use crate::daemon::shard::ShardName;
use crate::interfaces::{Event, StorageError};

/// Errors that can occur during dead letter operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Dead letter sink not configured")]
    NotConfigured,

    #[error("Failed to record dead letter: {0}")]
    PublishFailed(String),

    #[error("Dead letter storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DlqError {
    pub fn is_transient(&self) -> bool {
        match self {
            DlqError::NotConfigured => false,
            DlqError::PublishFailed(_) => true,
            DlqError::Storage(e) => e.is_transient(),
        }
    }
}

/// Why an event was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The payload could not be decoded.
    Deserialization,
    /// The projection rejected the event under the skip policy.
    ApplyFailed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Deserialization => "deserialization",
            DeadLetterReason::ApplyFailed => "apply_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deserialization" => Some(DeadLetterReason::Deserialization),
            "apply_failed" => Some(DeadLetterReason::ApplyFailed),
            _ => None,
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one skipped event.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEvent {
    /// Shard identity, e.g. `orders:All`.
    pub shard: String,
    pub projection_name: String,
    pub event_sequence: i64,
    pub event_type: String,
    pub stream_id: String,
    pub reason: DeadLetterReason,
    /// Error text from the decoder or projection.
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterEvent {
    /// Dead letter for an event whose payload could not be decoded.
    pub fn poison(shard: &ShardName, poison: &PoisonEvent) -> Self {
        Self {
            shard: shard.identity().to_string(),
            projection_name: shard.name().to_string(),
            event_sequence: poison.sequence,
            event_type: poison.event_type.clone(),
            stream_id: poison.stream_id.clone(),
            reason: DeadLetterReason::Deserialization,
            message: poison.reason.clone(),
            recorded_at: Utc::now(),
        }
    }

    /// Dead letter for an event the projection could not handle.
    pub fn from_event(
        shard: &ShardName,
        event: &Event,
        reason: DeadLetterReason,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            shard: shard.identity().to_string(),
            projection_name: shard.name().to_string(),
            event_sequence: event.sequence,
            event_type: event.event_type.clone(),
            stream_id: event.stream_id.clone(),
            reason,
            message: message.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only store of skipped events.
///
/// Implementations:
/// - `NoopDeadLetterSink`: logs only
/// - `ChannelDeadLetterSink`: forwards to an in-process receiver
/// - `MockDeadLetterSink`: in-memory, queryable
/// - `SqlDeadLetterSink`: `dead_letters` table
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Append a dead letter.
    async fn record(&self, dead_letter: DeadLetterEvent) -> Result<(), DlqError>;

    /// Dead letters recorded for a shard, oldest first.
    ///
    /// Sinks that cannot be read back return an empty list.
    async fn list(&self, _shard: &str) -> Result<Vec<DeadLetterEvent>, DlqError> {
        Ok(Vec::new())
    }

    /// Check if the sink persists anywhere.
    fn is_configured(&self) -> bool {
        true
    }
}

/// No-op sink that logs but doesn't store anything.
///
/// Used when no dead letter storage is configured.
pub struct NoopDeadLetterSink;

#[async_trait]
impl DeadLetterSink for NoopDeadLetterSink {
    async fn record(&self, dead_letter: DeadLetterEvent) -> Result<(), DlqError> {
        warn!(
            shard = %dead_letter.shard,
            sequence = dead_letter.event_sequence,
            reason = %dead_letter.reason,
            message = %dead_letter.message,
            "Dead letter sink not configured, logging dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Shared no-op sink, selected with `dead_letters: log`.
pub fn noop_sink() -> Arc<dyn DeadLetterSink> {
    Arc::new(NoopDeadLetterSink)
}
