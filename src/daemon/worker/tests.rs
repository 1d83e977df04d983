use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::dlq::DeadLetterSink;
use crate::interfaces::{BatchProjection, EventProjection, ProgressStore};
use crate::storage::mock::{raw_event, MockHandles};

const WAIT: Duration = Duration::from_secs(10);

/// Counts events per stream. `Boom` events are rejected and `Garbled`
/// events fail to decode.
struct StreamCounter;

impl EventProjection for StreamCounter {
    fn apply(
        &self,
        event: &Event,
        session: &mut ProjectionSession<'_>,
    ) -> std::result::Result<(), ProjectionError> {
        match event.event_type.as_str() {
            "Boom" => return Err(ProjectionError::apply(event, "boom")),
            "Garbled" => return Err(ProjectionError::deserialization(event, "garbled")),
            _ => {}
        }
        let seen = session
            .pending()
            .iter()
            .filter(|op| op.id() == event.stream_id)
            .count();
        session.store_value(
            "counts",
            &event.stream_id,
            json!({ "seen": seen + 1, "last": event.sequence }),
        );
        Ok(())
    }
}

struct BatchCounter;

#[async_trait]
impl BatchProjection for BatchCounter {
    async fn apply_batch(
        &self,
        events: &[Event],
        session: &mut ProjectionSession<'_>,
    ) -> std::result::Result<(), ProjectionError> {
        let total = session
            .load("totals", "all")
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        session.store_value("totals", "all", json!(total + events.len() as i64));
        Ok(())
    }
}

fn config(policy: ApplyErrorPolicy, skip_serialization_errors: bool) -> Arc<DaemonConfig> {
    Arc::new(DaemonConfig {
        options: AsyncOptions::new(4, 8),
        errors: ErrorHandlingConfig {
            apply_error_policy: policy,
            skip_serialization_errors,
            pause_ms: 20,
        },
        retry: RetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 5,
            max_retries: 3,
        },
        ..Default::default()
    })
}

struct Harness {
    handles: MockHandles,
    storage: Storage,
    bus: Arc<ShardStateBus>,
}

impl Harness {
    fn new() -> Self {
        let (storage, handles) = Storage::in_memory();
        Self {
            handles,
            storage,
            bus: Arc::new(ShardStateBus::new()),
        }
    }

    async fn append(&self, event_type: &str, count: usize) {
        for _ in 0..count {
            self.handles
                .event_log
                .append("stream-1", event_type, json!({}))
                .await;
        }
    }

    fn spawn(&self, definition: ProjectionDefinition, config: Arc<DaemonConfig>) -> ShardWorkerHandle {
        let shard = definition.shard_names().remove(0);
        ShardWorker::new(
            shard,
            Arc::new(definition),
            self.storage.clone(),
            self.bus.clone(),
            config,
        )
        .spawn()
    }

    async fn progress(&self, identity: &str) -> i64 {
        self.handles
            .projections
            .fetch_progress(identity)
            .await
            .unwrap()
    }
}

fn counter() -> ProjectionDefinition {
    ProjectionDefinition::new("counter", ProjectionHandler::single(StreamCounter)).with_collection("counts")
}

async fn wait_for_status(handle: &ShardWorkerHandle, wanted: ShardStatus) -> WorkerStatus {
    let mut rx = handle.watch_status();
    tokio::time::timeout(WAIT, async {
        loop {
            let current = rx.borrow_and_update().clone();
            if current.status == wanted {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .unwrap()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_worker_catches_up_to_high_water() {
    let h = Harness::new();
    h.append("Tick", 10).await;
    h.bus.publish(ShardState::high_water(10));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 10, WAIT)
        .await
        .unwrap();

    assert_eq!(h.progress("counter:All").await, 10);
    assert_eq!(
        h.handles.projections.document("counts", "stream-1").await.unwrap()["last"],
        json!(10)
    );

    let commits = h.handles.projections.commits().await;
    let bounds: Vec<(i64, i64)> = commits.iter().map(|c| (c.previous, c.ceiling)).collect();
    assert_eq!(bounds, vec![(0, 4), (4, 8), (8, 10)]);

    let status = handle.shutdown().await;
    assert_eq!(status.status, ShardStatus::Stopped);
    assert_eq!(status.sequence, 10);
}

#[tokio::test]
async fn test_worker_follows_high_water_updates() {
    let h = Harness::new();
    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    wait_for_status(&handle, ShardStatus::Running).await;

    h.append("Tick", 3).await;
    h.bus.publish(ShardState::high_water(3));
    h.bus
        .wait_for_shard_state("counter:All", 3, WAIT)
        .await
        .unwrap();

    h.append("Tick", 2).await;
    h.bus.publish(ShardState::high_water(5));
    h.bus
        .wait_for_shard_state("counter:All", 5, WAIT)
        .await
        .unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn test_worker_resumes_from_stored_progress() {
    let h = Harness::new();
    h.append("Tick", 6).await;
    h.handles
        .projections
        .update_progress("counter:All", 0, 4)
        .await
        .unwrap();
    h.bus.publish(ShardState::high_water(6));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 6, WAIT)
        .await
        .unwrap();

    let commits = h.handles.projections.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!((commits[0].previous, commits[0].ceiling), (4, 6));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_batch_projection_sees_whole_range() {
    let h = Harness::new();
    h.append("Tick", 6).await;
    h.bus.publish(ShardState::high_water(6));

    let definition = ProjectionDefinition::new("totals", ProjectionHandler::batched(BatchCounter));
    let handle = h.spawn(definition, config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("totals:All", 6, WAIT)
        .await
        .unwrap();

    assert_eq!(h.handles.projections.document("totals", "all").await, Some(json!(6)));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_tenant_group_only_sees_its_tenant() {
    let h = Harness::new();
    for (sequence, tenant) in [(1, "acme"), (2, "globex"), (3, "acme")] {
        let mut event = raw_event(sequence, &format!("{}-stream", tenant), "Tick", &json!({}));
        event.tenant_id = tenant.to_string();
        h.handles.event_log.append_raw(event).await;
    }
    h.bus.publish(ShardState::high_water(3));

    let definition = counter().with_groups(["acme"]);
    let handle = h.spawn(definition, config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:acme", 3, WAIT)
        .await
        .unwrap();

    assert!(h.handles.projections.document("counts", "acme-stream").await.is_some());
    assert!(h.handles.projections.document("counts", "globex-stream").await.is_none());
    handle.shutdown().await;
}

// ============================================================================
// Projection Failures
// ============================================================================

#[tokio::test]
async fn test_stop_policy_errors_without_committing_range() {
    let h = Harness::new();
    h.append("Tick", 2).await;
    h.append("Boom", 1).await;
    h.bus.publish(ShardState::high_water(3));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    let status = wait_for_status(&handle, ShardStatus::Errored).await;

    assert_eq!(status.status, ShardStatus::Errored);
    assert!(status.error.unwrap().contains("sequence 3"));
    assert_eq!(h.progress("counter:All").await, 0);
    assert!(h.handles.projections.document("counts", "stream-1").await.is_none());
    assert!(h.handles.dead_letters.all().await.is_empty());
}

#[tokio::test]
async fn test_skip_policy_dead_letters_and_advances() {
    let h = Harness::new();
    h.append("Tick", 1).await;
    h.append("Boom", 1).await;
    h.append("Tick", 1).await;
    h.bus.publish(ShardState::high_water(3));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::SkipEvent, true));
    h.bus
        .wait_for_shard_state("counter:All", 3, WAIT)
        .await
        .unwrap();

    let dead = h.handles.dead_letters.list("counter:All").await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_sequence, 2);
    assert_eq!(dead[0].reason, DeadLetterReason::ApplyFailed);
    assert_eq!(dead[0].projection_name, "counter");
    assert_eq!(
        h.handles.projections.document("counts", "stream-1").await.unwrap()["last"],
        json!(3)
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn test_projection_deserialization_failure_is_dead_lettered_under_stop_policy() {
    let h = Harness::new();
    h.append("Garbled", 1).await;
    h.append("Tick", 1).await;
    h.bus.publish(ShardState::high_water(2));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 2, WAIT)
        .await
        .unwrap();

    let dead = h.handles.dead_letters.all().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::Deserialization);
    handle.shutdown().await;
}

// ============================================================================
// Poison Events
// ============================================================================

async fn append_with_poison(h: &Harness) {
    h.append("Tick", 1).await;
    let mut broken = raw_event(2, "stream-1", "Tick", &json!({}));
    broken.data = "{broken".to_string();
    h.handles.event_log.append_raw(broken).await;
    h.handles.event_log.append_at(3, "stream-1", "Tick", json!({})).await;
    h.bus.publish(ShardState::high_water(3));
}

#[tokio::test]
async fn test_poison_event_is_skipped() {
    let h = Harness::new();
    append_with_poison(&h).await;

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 3, WAIT)
        .await
        .unwrap();

    let dead = h.handles.dead_letters.all().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_sequence, 2);
    assert_eq!(dead[0].reason, DeadLetterReason::Deserialization);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_poison_event_without_skip_commits_prefix_then_errors() {
    let h = Harness::new();
    append_with_poison(&h).await;

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, false));
    let status = wait_for_status(&handle, ShardStatus::Errored).await;

    assert_eq!(status.sequence, 1);
    assert_eq!(h.progress("counter:All").await, 1);
    assert!(status.error.unwrap().contains("Poison event at sequence 2"));
    assert!(h.handles.dead_letters.all().await.is_empty());
}

// ============================================================================
// Infrastructure Failures
// ============================================================================

#[tokio::test]
async fn test_transient_commit_failures_are_retried() {
    let h = Harness::new();
    h.append("Tick", 4).await;
    h.handles.projections.fail_next_commits(2).await;
    h.bus.publish(ShardState::high_water(4));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 4, WAIT)
        .await
        .unwrap();

    assert_eq!(h.handles.projections.commits().await.len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_transient_load_failures_are_retried() {
    let h = Harness::new();
    h.append("Tick", 4).await;
    h.handles.event_log.fail_next_reads(2).await;
    h.bus.publish(ShardState::high_water(4));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    h.bus
        .wait_for_shard_state("counter:All", 4, WAIT)
        .await
        .unwrap();
    handle.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_pause_then_recover() {
    let h = Harness::new();
    h.append("Tick", 4).await;
    h.handles.projections.set_fail_on_commit(true).await;
    h.bus.publish(ShardState::high_water(4));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    let paused = wait_for_status(&handle, ShardStatus::Paused).await;
    assert!(paused.error.unwrap().contains("gave up"));

    h.handles.projections.set_fail_on_commit(false).await;
    h.bus
        .wait_for_shard_state("counter:All", 4, WAIT)
        .await
        .unwrap();
    assert_eq!(handle.status(), ShardStatus::Running);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_dead_letter_sink_is_retried() {
    let h = Harness::new();
    h.append("Tick", 1).await;
    h.append("Boom", 1).await;
    h.handles.dead_letters.set_fail_on_record(true).await;
    h.bus.publish(ShardState::high_water(2));

    let handle = h.spawn(counter(), config(ApplyErrorPolicy::SkipEvent, true));
    wait_for_status(&handle, ShardStatus::Paused).await;
    assert_eq!(h.progress("counter:All").await, 0);

    h.handles.dead_letters.set_fail_on_record(false).await;
    h.bus
        .wait_for_shard_state("counter:All", 2, WAIT)
        .await
        .unwrap();
    let dead = h.handles.dead_letters.all().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_sequence, 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_out_of_order_commit_errors_shard() {
    let h = Harness::new();
    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    wait_for_status(&handle, ShardStatus::Running).await;

    // Another writer moves the cursor behind this worker's back.
    h.handles
        .projections
        .update_progress("counter:All", 0, 2)
        .await
        .unwrap();
    h.append("Tick", 4).await;
    h.bus.publish(ShardState::high_water(4));

    let status = wait_for_status(&handle, ShardStatus::Errored).await;
    let error = status.error.unwrap();
    assert!(error.contains("out of order"));
    assert!(error.contains("counter:All"));
    assert_eq!(h.progress("counter:All").await, 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_new_worker_reports_starting() {
    let h = Harness::new();
    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    assert_eq!(handle.status(), ShardStatus::Starting);
    assert!(handle.status().is_active());
    wait_for_status(&handle, ShardStatus::Running).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_stop_publishes_stopped_state() {
    let h = Harness::new();
    let mut states = h.bus.subscribe();
    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    wait_for_status(&handle, ShardStatus::Running).await;

    let status = handle.shutdown().await;
    assert_eq!(status.status, ShardStatus::Stopped);

    let mut actions = Vec::new();
    while let Ok(state) = states.try_recv() {
        actions.push(state.action);
    }
    assert_eq!(actions, vec![ShardAction::Started, ShardAction::Stopped]);
}

#[tokio::test]
async fn test_dropping_handle_stops_worker() {
    let h = Harness::new();
    let handle = h.spawn(counter(), config(ApplyErrorPolicy::Stop, true));
    wait_for_status(&handle, ShardStatus::Running).await;
    let mut status = handle.watch_status();
    drop(handle);

    tokio::time::timeout(WAIT, async {
        while status.borrow_and_update().status != ShardStatus::Stopped {
            if status.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(status.borrow().status, ShardStatus::Stopped);
}

#[test]
fn test_queue_depth_covers_hopper() {
    assert_eq!(queue_depth(&AsyncOptions::new(500, 2500)), 6);
    assert_eq!(queue_depth(&AsyncOptions::new(500, 900)), 3);
    assert_eq!(queue_depth(&AsyncOptions::new(1000, 10)), 2);
}
