//! DeadLetterSink interface tests.

use chrono::Utc;
use waymark::dlq::{DeadLetterEvent, DeadLetterReason, DeadLetterSink};

use super::unique;

fn dead_letter(shard: &str, sequence: i64, reason: DeadLetterReason) -> DeadLetterEvent {
    DeadLetterEvent {
        shard: shard.to_string(),
        projection_name: "orders".to_string(),
        event_sequence: sequence,
        event_type: "OrderPlaced".to_string(),
        stream_id: "order-1".to_string(),
        reason,
        message: "boom".to_string(),
        recorded_at: Utc::now(),
    }
}

pub async fn test_record_and_list<S: DeadLetterSink>(sink: &S) {
    let shard = unique("dlq");
    sink.record(dead_letter(&shard, 3, DeadLetterReason::ApplyFailed))
        .await
        .expect("record should succeed");
    sink.record(dead_letter(&shard, 7, DeadLetterReason::Deserialization))
        .await
        .unwrap();

    let listed = sink.list(&shard).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].event_sequence, 3);
    assert_eq!(listed[0].reason, DeadLetterReason::ApplyFailed);
    assert_eq!(listed[1].event_sequence, 7);
    assert_eq!(listed[1].reason, DeadLetterReason::Deserialization);
    assert_eq!(listed[1].message, "boom");
}

pub async fn test_list_is_per_shard<S: DeadLetterSink>(sink: &S) {
    let shard = unique("dlq_mine");
    let other = unique("dlq_other");
    sink.record(dead_letter(&other, 1, DeadLetterReason::ApplyFailed))
        .await
        .unwrap();

    assert!(sink.list(&shard).await.unwrap().is_empty());
}

#[macro_export]
macro_rules! run_dead_letter_tests {
    ($sink:expr) => {{
        use $crate::storage::dead_letter_tests::*;

        test_record_and_list($sink).await;
        println!("  test_record_and_list: PASSED");

        test_list_is_per_shard($sink).await;
        println!("  test_list_is_per_shard: PASSED");
    }};
}
