//! Per-stream summary projection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::interfaces::{AsyncEventProjection, Event, ProjectionError, ProjectionSession};

/// Collection holding one [`StreamSummary`] per stream.
pub const STREAM_SUMMARY_COLLECTION: &str = "stream_summaries";

/// Document written for each stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub stream_type: Option<String>,
    pub event_count: i64,
    pub last_sequence: i64,
    pub last_event_type: String,
}

/// Counts events per stream and remembers the latest one.
pub struct StreamSummaryProjection;

impl StreamSummaryProjection {
    pub const NAME: &'static str = "stream_summary";
}

#[async_trait]
impl AsyncEventProjection for StreamSummaryProjection {
    async fn apply(
        &self,
        event: &Event,
        session: &mut ProjectionSession<'_>,
    ) -> Result<(), ProjectionError> {
        let mut summary: StreamSummary = session
            .load_as(STREAM_SUMMARY_COLLECTION, &event.stream_id)
            .await?
            .unwrap_or_else(|| StreamSummary {
                stream_id: event.stream_id.clone(),
                ..Default::default()
            });

        // Replays of an already-counted range must not double count.
        if event.sequence <= summary.last_sequence {
            return Ok(());
        }

        summary.event_count += 1;
        summary.last_sequence = event.sequence;
        summary.last_event_type = event.event_type.clone();
        if event.aggregate_type_name.is_some() {
            summary.stream_type = event.aggregate_type_name.clone();
        }

        session.store(STREAM_SUMMARY_COLLECTION, &event.stream_id, &summary)
    }
}
