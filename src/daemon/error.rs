//! Daemon error types.

use std::time::Duration;

use crate::dlq::DlqError;
use crate::interfaces::StorageError;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors raised by shard workers, the supervisor and the state bus.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dead letter error: {0}")]
    DeadLetter(#[from] DlqError),

    #[error("Projection {projection} failed on shard {shard} at sequence {sequence}: {message}")]
    ProjectionFailed {
        shard: String,
        projection: String,
        sequence: i64,
        message: String,
    },

    #[error("Poison event at sequence {sequence} on shard {shard}: {reason}")]
    PoisonEvent {
        shard: String,
        sequence: i64,
        reason: String,
    },

    #[error("Timed out after {timeout:?} waiting for {identity} to reach {sequence}")]
    Timeout {
        identity: String,
        sequence: i64,
        timeout: Duration,
    },

    #[error("Shard state bus completed")]
    BusCompleted,

    #[error("Unknown shard or projection: {0}")]
    UnknownShard(String),

    #[error("Projection registered twice: {0}")]
    DuplicateProjection(String),

    #[error("Shard {shard} gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        shard: String,
        attempts: usize,
        last_error: String,
    },

    #[error("Pipeline stage for shard {0} exited unexpectedly")]
    StageExited(String),

    #[error("Rebuild of {projection} failed: {reason}")]
    RebuildFailed { projection: String, reason: String },

    #[error("Shards are not owned by this node")]
    NotOwner,
}

impl DaemonError {
    /// Whether the failing operation may succeed if tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            DaemonError::Storage(e) => e.is_transient(),
            DaemonError::DeadLetter(e) => e.is_transient(),
            DaemonError::Timeout { .. } | DaemonError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}
