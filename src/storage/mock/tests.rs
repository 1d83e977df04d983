use std::time::Duration;

use serde_json::json;

use crate::dlq::{DeadLetterEvent, DeadLetterReason, DeadLetterSink};
use crate::storage::{
    DistributedLease, DocumentOp, DocumentStore, EventFilter, EventLogGateway, ProgressCommit,
    ProgressStore, StorageError,
};

use super::*;

// ============================================================================
// Event Log Tests
// ============================================================================

#[tokio::test]
async fn test_mock_event_log_append_assigns_sequences() {
    let log = MockEventLog::new();
    assert_eq!(log.append("order-1", "OrderPlaced", json!({})).await, 1);
    assert_eq!(log.append("order-1", "OrderShipped", json!({})).await, 2);
    assert_eq!(log.highest_sequence().await.unwrap(), 2);
}

#[tokio::test]
async fn test_mock_event_log_read_range_is_half_open() {
    let log = MockEventLog::new();
    for _ in 0..5 {
        log.append("s", "Tick", json!({})).await;
    }

    let events = log.read_range(1, 3, &EventFilter::all()).await.unwrap();
    let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![2, 3]);
}

#[tokio::test]
async fn test_mock_event_log_detects_gap() {
    let log = MockEventLog::new();
    log.append_at(1, "s", "Tick", json!({})).await;
    log.append_at(2, "s", "Tick", json!({})).await;
    log.append_at(4, "s", "Tick", json!({})).await;

    let probe = log.detect_gap(0).await.unwrap();
    assert_eq!(probe.safe_ceiling, 2);
    assert_eq!(probe.highest_sequence, 4);
    assert!(probe.has_gap());

    assert_eq!(log.first_sequence_after(2).await.unwrap(), Some(4));
    assert_eq!(log.first_sequence_after(4).await.unwrap(), None);
}

#[tokio::test]
async fn test_mock_event_log_empty_probe() {
    let log = MockEventLog::new();
    let probe = log.detect_gap(0).await.unwrap();
    assert_eq!(probe.safe_ceiling, 0);
    assert!(!probe.has_gap());
}

#[tokio::test]
async fn test_mock_event_log_fail_next_reads_recovers() {
    let log = MockEventLog::new();
    log.append("s", "Tick", json!({})).await;
    log.fail_next_reads(1).await;

    let err = log.read_range(0, 1, &EventFilter::all()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(log.read_range(0, 1, &EventFilter::all()).await.unwrap().len(), 1);
}

// ============================================================================
// Projection Store Tests
// ============================================================================

#[tokio::test]
async fn test_mock_progress_defaults_to_zero() {
    let store = MockProjectionStore::new();
    assert_eq!(store.fetch_progress("orders:All").await.unwrap(), 0);
}

#[tokio::test]
async fn test_mock_progress_rejects_out_of_order() {
    let store = MockProjectionStore::new();
    store.update_progress("orders:All", 0, 10).await.unwrap();

    let err = store.update_progress("orders:All", 5, 20).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::ProgressionOutOfOrder { expected: 5, actual: 10, .. }
    ));
    assert_eq!(store.fetch_progress("orders:All").await.unwrap(), 10);
}

#[tokio::test]
async fn test_mock_insert_progress_twice_fails() {
    let store = MockProjectionStore::new();
    store.insert_progress("orders:All", 0).await.unwrap();
    let err = store.insert_progress("orders:All", 0).await.unwrap_err();
    assert!(matches!(err, StorageError::ProgressExists { .. }));
}

#[tokio::test]
async fn test_mock_commit_is_atomic_on_cursor_mismatch() {
    let store = MockProjectionStore::new();
    store.update_progress("orders:All", 0, 10).await.unwrap();

    let err = store
        .commit(ProgressCommit {
            shard: "orders:All".to_string(),
            previous: 0,
            ceiling: 20,
            operations: vec![DocumentOp::Upsert {
                collection: "docs".to_string(),
                id: "a".to_string(),
                body: json!(1),
            }],
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::ProgressionOutOfOrder { .. }));
    assert_eq!(store.document("docs", "a").await, None);
}

#[tokio::test]
async fn test_mock_commit_applies_documents_and_cursor() {
    let store = MockProjectionStore::new();
    store
        .commit(ProgressCommit {
            shard: "orders:All".to_string(),
            previous: 0,
            ceiling: 3,
            operations: vec![
                DocumentOp::Upsert {
                    collection: "docs".to_string(),
                    id: "a".to_string(),
                    body: json!({"n": 1}),
                },
                DocumentOp::Upsert {
                    collection: "docs".to_string(),
                    id: "b".to_string(),
                    body: json!({"n": 2}),
                },
                DocumentOp::Delete {
                    collection: "docs".to_string(),
                    id: "b".to_string(),
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(store.fetch_progress("orders:All").await.unwrap(), 3);
    assert_eq!(store.load("docs", "a").await.unwrap(), Some(json!({"n": 1})));
    assert_eq!(store.load("docs", "b").await.unwrap(), None);
    assert_eq!(store.commits().await.len(), 1);
}

#[tokio::test]
async fn test_mock_delete_collection_counts_rows() {
    let store = MockProjectionStore::new();
    store
        .commit(ProgressCommit {
            shard: "s".to_string(),
            previous: 0,
            ceiling: 1,
            operations: vec![
                DocumentOp::Upsert {
                    collection: "a".to_string(),
                    id: "1".to_string(),
                    body: json!(1),
                },
                DocumentOp::Upsert {
                    collection: "b".to_string(),
                    id: "1".to_string(),
                    body: json!(1),
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(store.delete_collection("a").await.unwrap(), 1);
    assert_eq!(store.collection_len("a").await, 0);
    assert_eq!(store.collection_len("b").await, 1);
}

// ============================================================================
// Dead Letter Tests
// ============================================================================

#[tokio::test]
async fn test_mock_dead_letters_listed_by_shard() {
    let sink = MockDeadLetterSink::new();
    for shard in ["orders:All", "invoices:All"] {
        sink.record(DeadLetterEvent {
            shard: shard.to_string(),
            projection_name: "p".to_string(),
            event_sequence: 4,
            event_type: "OrderPlaced".to_string(),
            stream_id: "order-1".to_string(),
            reason: DeadLetterReason::ApplyFailed,
            message: "boom".to_string(),
            recorded_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    }

    assert_eq!(sink.all().await.len(), 2);
    let orders = sink.list("orders:All").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].event_sequence, 4);
}

// ============================================================================
// Lease Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_lease_single_holder_until_expiry() {
    let lease = InMemoryLease::new();
    let ttl = Duration::from_secs(10);

    assert!(lease.try_acquire("lock", "a", ttl).await.unwrap());
    assert!(!lease.try_acquire("lock", "b", ttl).await.unwrap());
    assert_eq!(lease.holder("lock").await.as_deref(), Some("a"));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(lease.holder("lock").await, None);
    assert!(lease.try_acquire("lock", "b", ttl).await.unwrap());
    assert!(!lease.renew("lock", "a", ttl).await.unwrap());
}

#[tokio::test]
async fn test_lease_release_only_by_holder() {
    let lease = InMemoryLease::new();
    let ttl = Duration::from_secs(10);
    lease.try_acquire("lock", "a", ttl).await.unwrap();

    lease.release("lock", "b").await.unwrap();
    assert_eq!(lease.holder("lock").await.as_deref(), Some("a"));

    lease.release("lock", "a").await.unwrap();
    assert_eq!(lease.holder("lock").await, None);
}

#[tokio::test]
async fn test_lease_unreachable_holder_errors() {
    let lease = InMemoryLease::new();
    lease.set_unreachable("a", true).await;
    let err = lease
        .try_acquire("lock", "a", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
