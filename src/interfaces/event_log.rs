//! Event log interface.

use async_trait::async_trait;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Progression out of order for shard {shard}: expected previous {expected}, stored {actual}")]
    ProgressionOutOfOrder {
        shard: String,
        expected: i64,
        actual: i64,
    },

    #[error("Progress regression for shard {shard}: {from} -> {to}")]
    ProgressRegression { shard: String, from: i64, to: i64 },

    #[error("Progress already recorded for shard {shard}")]
    ProgressExists { shard: String },

    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Connection and lock contention faults are transient. Ordering
    /// violations and malformed data never are.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            StorageError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Database(_)
            ),
            _ => false,
        }
    }
}

/// A log entry as stored, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Global, strictly increasing sequence number.
    pub sequence: i64,
    pub stream_id: String,
    /// Position of the event inside its stream.
    pub version: i64,
    pub event_type: String,
    /// Aggregate type declared by the stream, if any.
    pub stream_type: Option<String>,
    pub tenant_id: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// JSON payload.
    pub data: String,
}

/// Inclusion filters applied when reading a range.
///
/// Empty allow-lists admit everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_types: Vec<String>,
    pub stream_types: Vec<String>,
    pub tenant_id: Option<String>,
}

impl EventFilter {
    /// Filter that admits every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Check whether an event passes this filter.
    pub fn matches(&self, event: &RawEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.stream_types.is_empty() {
            match &event.stream_type {
                Some(stream_type) if self.stream_types.contains(stream_type) => {}
                _ => return false,
            }
        }
        match &self.tenant_id {
            Some(tenant) => &event.tenant_id == tenant,
            None => true,
        }
    }
}

/// Result of a gap probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapProbe {
    /// Highest `S` such that every sequence in `(start, S]` exists.
    /// Equals `start` when nothing contiguous follows it.
    pub safe_ceiling: i64,
    /// Highest sequence present in the log.
    pub highest_sequence: i64,
}

impl GapProbe {
    /// A probe for an empty tail: nothing exists past `start`.
    pub fn caught_up(start: i64) -> Self {
        Self {
            safe_ceiling: start,
            highest_sequence: start,
        }
    }

    /// True when events exist beyond a missing sequence.
    pub fn has_gap(&self) -> bool {
        self.highest_sequence > self.safe_ceiling
    }
}

/// Interface for reading the event log.
///
/// All operations are reads and must be safe to call concurrently from
/// many shards against the same underlying log.
///
/// Implementations:
/// - `MockEventLog`: in-memory log for tests and local runs
/// - `SqlEventLog`: SQLite / PostgreSQL `events` table
#[async_trait]
pub trait EventLogGateway: Send + Sync {
    /// Read events in `(floor, ceiling]` that match `filter`, ascending.
    async fn read_range(
        &self,
        floor: i64,
        ceiling: i64,
        filter: &EventFilter,
    ) -> Result<Vec<RawEvent>>;

    /// Find the contiguous ceiling after `start` in a single query.
    async fn detect_gap(&self, start: i64) -> Result<GapProbe>;

    /// Highest sequence present in the log, 0 when empty.
    async fn highest_sequence(&self) -> Result<i64>;

    /// Lowest sequence strictly greater than `sequence`, if any.
    async fn first_sequence_after(&self, sequence: i64) -> Result<Option<i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event_type: &str, stream_type: Option<&str>, tenant: &str) -> RawEvent {
        RawEvent {
            sequence: 1,
            stream_id: "order-1".to_string(),
            version: 1,
            event_type: event_type.to_string(),
            stream_type: stream_type.map(str::to_string),
            tenant_id: tenant.to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            data: "{}".to_string(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EventFilter::all();
        assert!(filter.matches(&raw("OrderPlaced", None, "*DEFAULT*")));
    }

    #[test]
    fn test_event_type_filter() {
        let filter = EventFilter {
            event_types: vec!["OrderPlaced".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&raw("OrderPlaced", None, "t1")));
        assert!(!filter.matches(&raw("OrderShipped", None, "t1")));
    }

    #[test]
    fn test_stream_type_filter_excludes_untyped_streams() {
        let filter = EventFilter {
            stream_types: vec!["Order".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&raw("OrderPlaced", Some("Order"), "t1")));
        assert!(!filter.matches(&raw("OrderPlaced", Some("Invoice"), "t1")));
        assert!(!filter.matches(&raw("OrderPlaced", None, "t1")));
    }

    #[test]
    fn test_tenant_filter() {
        let filter = EventFilter {
            tenant_id: Some("acme".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&raw("OrderPlaced", None, "acme")));
        assert!(!filter.matches(&raw("OrderPlaced", None, "globex")));
    }

    #[test]
    fn test_gap_probe_has_gap() {
        assert!(!GapProbe::caught_up(10).has_gap());
        let probe = GapProbe {
            safe_ceiling: 10,
            highest_sequence: 12,
        };
        assert!(probe.has_gap());
    }

    #[test]
    fn test_unavailable_is_transient() {
        assert!(StorageError::Unavailable("down".to_string()).is_transient());
        let ordering = StorageError::ProgressionOutOfOrder {
            shard: "orders:All".to_string(),
            expected: 5,
            actual: 7,
        };
        assert!(!ordering.is_transient());
    }
}
