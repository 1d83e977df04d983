//! ProgressStore and DocumentStore interface tests.
//!
//! Every test works on freshly named shards and collections.

use serde_json::json;
use waymark::storage::{DocumentOp, DocumentStore, ProgressCommit, ProgressStore, StorageError};

use super::unique;

// =============================================================================
// Cursor tests
// =============================================================================

pub async fn test_missing_progress_reads_zero<S: ProgressStore>(store: &S) {
    let shard = unique("missing");
    let sequence = store
        .fetch_progress(&shard)
        .await
        .expect("fetch_progress should succeed");
    assert_eq!(sequence, 0);
}

pub async fn test_update_from_zero_creates_row<S: ProgressStore>(store: &S) {
    let shard = unique("create");
    store.update_progress(&shard, 0, 5).await.unwrap();
    store.update_progress(&shard, 5, 9).await.unwrap();
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 9);
}

pub async fn test_insert_progress_once<S: ProgressStore>(store: &S) {
    let shard = unique("insert");
    store.insert_progress(&shard, 3).await.unwrap();
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 3);

    let err = store.insert_progress(&shard, 4).await.unwrap_err();
    assert!(
        matches!(err, StorageError::ProgressExists { .. }),
        "expected ProgressExists, got {:?}",
        err
    );
}

pub async fn test_out_of_order_update_rejected<S: ProgressStore>(store: &S) {
    let shard = unique("order");
    store.update_progress(&shard, 0, 10).await.unwrap();

    let err = store.update_progress(&shard, 4, 12).await.unwrap_err();
    match err {
        StorageError::ProgressionOutOfOrder {
            expected, actual, ..
        } => {
            assert_eq!(expected, 4);
            assert_eq!(actual, 10);
        }
        other => panic!("expected ProgressionOutOfOrder, got {:?}", other),
    }
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 10);
}

pub async fn test_regression_rejected<S: ProgressStore>(store: &S) {
    let shard = unique("regress");
    store.update_progress(&shard, 0, 10).await.unwrap();

    let err = store.update_progress(&shard, 10, 8).await.unwrap_err();
    assert!(matches!(err, StorageError::ProgressRegression { .. }));
}

pub async fn test_reset_progress<S: ProgressStore>(store: &S) {
    let shard = unique("reset");
    store.update_progress(&shard, 0, 7).await.unwrap();
    store.reset_progress(&shard).await.unwrap();
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 0);

    store.update_progress(&shard, 0, 2).await.unwrap();
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 2);
}

pub async fn test_fetch_all_progress<S: ProgressStore>(store: &S) {
    let first = unique("all_a");
    let second = unique("all_b");
    store.update_progress(&first, 0, 1).await.unwrap();
    store.update_progress(&second, 0, 2).await.unwrap();

    let all = store.fetch_all_progress().await.unwrap();
    let find = |shard: &str| all.iter().find(|p| p.shard == shard).map(|p| p.sequence);
    assert_eq!(find(&first), Some(1));
    assert_eq!(find(&second), Some(2));
}

// =============================================================================
// Commit tests
// =============================================================================

pub async fn test_commit_writes_documents_and_cursor<S: ProgressStore + DocumentStore>(store: &S) {
    let shard = unique("commit");
    let collection = unique("docs");

    store
        .commit(ProgressCommit {
            shard: shard.clone(),
            previous: 0,
            ceiling: 4,
            operations: vec![
                DocumentOp::Upsert {
                    collection: collection.clone(),
                    id: "a".to_string(),
                    body: json!({ "count": 1 }),
                },
                DocumentOp::Upsert {
                    collection: collection.clone(),
                    id: "b".to_string(),
                    body: json!({ "count": 2 }),
                },
            ],
        })
        .await
        .expect("commit should succeed");

    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 4);
    assert_eq!(
        store.load(&collection, "a").await.unwrap(),
        Some(json!({ "count": 1 }))
    );

    store
        .commit(ProgressCommit {
            shard: shard.clone(),
            previous: 4,
            ceiling: 6,
            operations: vec![
                DocumentOp::Upsert {
                    collection: collection.clone(),
                    id: "a".to_string(),
                    body: json!({ "count": 3 }),
                },
                DocumentOp::Delete {
                    collection: collection.clone(),
                    id: "b".to_string(),
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(
        store.load(&collection, "a").await.unwrap(),
        Some(json!({ "count": 3 }))
    );
    assert_eq!(store.load(&collection, "b").await.unwrap(), None);
}

pub async fn test_rejected_commit_writes_nothing<S: ProgressStore + DocumentStore>(store: &S) {
    let shard = unique("atomic");
    let collection = unique("docs");
    store.update_progress(&shard, 0, 10).await.unwrap();

    let err = store
        .commit(ProgressCommit {
            shard: shard.clone(),
            previous: 5,
            ceiling: 15,
            operations: vec![DocumentOp::Upsert {
                collection: collection.clone(),
                id: "a".to_string(),
                body: json!({}),
            }],
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::ProgressionOutOfOrder { .. }));
    assert_eq!(store.fetch_progress(&shard).await.unwrap(), 10);
    assert_eq!(store.load(&collection, "a").await.unwrap(), None);
}

pub async fn test_delete_collection_is_scoped<S: ProgressStore + DocumentStore>(store: &S) {
    let shard = unique("scoped");
    let doomed = unique("doomed");
    let kept = unique("kept");

    store
        .commit(ProgressCommit {
            shard,
            previous: 0,
            ceiling: 1,
            operations: vec![
                DocumentOp::Upsert {
                    collection: doomed.clone(),
                    id: "a".to_string(),
                    body: json!({}),
                },
                DocumentOp::Upsert {
                    collection: doomed.clone(),
                    id: "b".to_string(),
                    body: json!({}),
                },
                DocumentOp::Upsert {
                    collection: kept.clone(),
                    id: "a".to_string(),
                    body: json!({}),
                },
            ],
        })
        .await
        .unwrap();

    let deleted = store.delete_collection(&doomed).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.load(&doomed, "a").await.unwrap(), None);
    assert!(store.load(&kept, "a").await.unwrap().is_some());
}

#[macro_export]
macro_rules! run_progress_store_tests {
    ($store:expr) => {{
        use $crate::storage::progress_store_tests::*;

        test_missing_progress_reads_zero($store).await;
        println!("  test_missing_progress_reads_zero: PASSED");

        test_update_from_zero_creates_row($store).await;
        println!("  test_update_from_zero_creates_row: PASSED");

        test_insert_progress_once($store).await;
        println!("  test_insert_progress_once: PASSED");

        test_out_of_order_update_rejected($store).await;
        println!("  test_out_of_order_update_rejected: PASSED");

        test_regression_rejected($store).await;
        println!("  test_regression_rejected: PASSED");

        test_reset_progress($store).await;
        println!("  test_reset_progress: PASSED");

        test_fetch_all_progress($store).await;
        println!("  test_fetch_all_progress: PASSED");

        test_commit_writes_documents_and_cursor($store).await;
        println!("  test_commit_writes_documents_and_cursor: PASSED");

        test_rejected_commit_writes_nothing($store).await;
        println!("  test_rejected_commit_writes_nothing: PASSED");

        test_delete_collection_is_scoped($store).await;
        println!("  test_delete_collection_is_scoped: PASSED");
    }};
}
