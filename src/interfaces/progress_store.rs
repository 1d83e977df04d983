//! Progress persistence interface.
//!
//! Each shard owns one durable cursor: the highest sequence whose effects
//! have been committed. Cursors only move forward through
//! `update_progress`/`commit`, and only when the caller names the value
//! currently stored. A mismatch means either a scheduling bug or two
//! writers driving the same shard, so it is reported and never clamped.

use async_trait::async_trait;

use super::document_store::DocumentOp;
use super::event_log::Result;

/// Progress key under which the high-water mark is persisted.
pub const HIGH_WATER_MARK_KEY: &str = "HighWaterMark";

/// Durable cursor for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionProgress {
    pub shard: String,
    pub sequence: i64,
}

/// One atomic unit of projection output.
///
/// Document operations and the cursor move from `previous` to `ceiling`
/// are applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressCommit {
    pub shard: String,
    pub previous: i64,
    pub ceiling: i64,
    pub operations: Vec<DocumentOp>,
}

/// Interface for shard progress persistence.
///
/// A missing cursor reads as 0, so `update_progress(shard, 0, n)` on a
/// shard with no row creates it.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Record an initial cursor. Fails if the shard already has one.
    async fn insert_progress(&self, shard: &str, sequence: i64) -> Result<()>;

    /// Move a cursor from `expected_previous` to `sequence`.
    ///
    /// Fails with `ProgressionOutOfOrder` when the stored value differs
    /// from `expected_previous`.
    async fn update_progress(&self, shard: &str, expected_previous: i64, sequence: i64)
        -> Result<()>;

    /// Current cursor, 0 if the shard has never committed.
    async fn fetch_progress(&self, shard: &str) -> Result<i64>;

    /// All stored cursors, ordered by shard identity.
    async fn fetch_all_progress(&self) -> Result<Vec<ProjectionProgress>>;

    /// Drop a cursor so the shard replays from 0.
    async fn reset_progress(&self, shard: &str) -> Result<()>;

    /// Apply document operations and advance the cursor atomically.
    async fn commit(&self, commit: ProgressCommit) -> Result<()>;
}
