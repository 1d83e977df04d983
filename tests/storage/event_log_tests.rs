//! EventLogGateway interface tests.
//!
//! Each test seeds its events above the current highest sequence, so the
//! tests can share one log and tolerate rows left by earlier runs.

use serde_json::json;
use waymark::storage::mock::raw_event;
use waymark::storage::EventFilter;

use super::SeedableEventLog;

async fn base<L: SeedableEventLog>(log: &L) -> i64 {
    log.highest_sequence()
        .await
        .expect("highest_sequence should succeed")
}

// =============================================================================
// read_range tests
// =============================================================================

pub async fn test_read_range_is_floor_exclusive<L: SeedableEventLog>(log: &L) {
    let base = base(log).await;
    for i in 1..=5 {
        log.seed(raw_event(base + i, "stream-range", "Tick", &json!({ "i": i })))
            .await;
    }

    let events = log
        .read_range(base + 1, base + 4, &EventFilter::all())
        .await
        .expect("read_range should succeed");

    let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![base + 2, base + 3, base + 4]);
    assert_eq!(events[0].stream_id, "stream-range");
    assert_eq!(events[0].event_type, "Tick");
}

pub async fn test_read_range_applies_filter<L: SeedableEventLog>(log: &L) {
    let base = base(log).await;
    let mut placed = raw_event(base + 1, "order-1", "OrderPlaced", &json!({}));
    placed.stream_type = Some("Order".to_string());
    placed.tenant_id = "acme".to_string();
    log.seed(placed).await;
    log.seed(raw_event(base + 2, "order-1", "OrderNoted", &json!({})))
        .await;
    let mut other = raw_event(base + 3, "order-2", "OrderPlaced", &json!({}));
    other.stream_type = Some("Order".to_string());
    log.seed(other).await;

    let by_type = EventFilter {
        event_types: vec!["OrderPlaced".to_string()],
        ..Default::default()
    };
    let events = log.read_range(base, base + 3, &by_type).await.unwrap();
    assert_eq!(events.len(), 2);

    let by_tenant = EventFilter {
        tenant_id: Some("acme".to_string()),
        ..Default::default()
    };
    let events = log.read_range(base, base + 3, &by_tenant).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence, base + 1);
    assert_eq!(events[0].stream_type.as_deref(), Some("Order"));
}

// =============================================================================
// Gap detection tests
// =============================================================================

pub async fn test_detect_gap_contiguous<L: SeedableEventLog>(log: &L) {
    let base = base(log).await;
    for i in 1..=3 {
        log.seed(raw_event(base + i, "stream-gapless", "Tick", &json!({})))
            .await;
    }

    let probe = log.detect_gap(base).await.expect("detect_gap should succeed");
    assert_eq!(probe.safe_ceiling, base + 3);
    assert_eq!(probe.highest_sequence, base + 3);
    assert!(!probe.has_gap());
}

pub async fn test_detect_gap_stops_before_hole<L: SeedableEventLog>(log: &L) {
    let base = base(log).await;
    log.seed(raw_event(base + 1, "stream-gap", "Tick", &json!({})))
        .await;
    log.seed(raw_event(base + 2, "stream-gap", "Tick", &json!({})))
        .await;
    log.seed(raw_event(base + 4, "stream-gap", "Tick", &json!({})))
        .await;

    let probe = log.detect_gap(base).await.unwrap();
    assert_eq!(probe.safe_ceiling, base + 2);
    assert_eq!(probe.highest_sequence, base + 4);
    assert!(probe.has_gap());

    let next = log.first_sequence_after(base + 2).await.unwrap();
    assert_eq!(next, Some(base + 4));
}

pub async fn test_detect_gap_at_head<L: SeedableEventLog>(log: &L) {
    let base = base(log).await;

    let probe = log.detect_gap(base).await.unwrap();
    assert_eq!(probe.safe_ceiling, base);
    assert_eq!(log.first_sequence_after(base).await.unwrap(), None);
}

#[macro_export]
macro_rules! run_event_log_tests {
    ($log:expr) => {{
        use $crate::storage::event_log_tests::*;

        test_read_range_is_floor_exclusive($log).await;
        println!("  test_read_range_is_floor_exclusive: PASSED");

        test_read_range_applies_filter($log).await;
        println!("  test_read_range_applies_filter: PASSED");

        test_detect_gap_contiguous($log).await;
        println!("  test_detect_gap_contiguous: PASSED");

        test_detect_gap_stops_before_hole($log).await;
        println!("  test_detect_gap_stops_before_hole: PASSED");

        test_detect_gap_at_head($log).await;
        println!("  test_detect_gap_at_head: PASSED");
    }};
}
