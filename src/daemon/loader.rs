//! Fetches event payloads for a range.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::range::{EventRange, PoisonEvent};
use crate::interfaces::{Event, EventFilter, EventLogGateway, RawEvent, Result};

#[derive(Clone)]
pub struct RangeLoader {
    gateway: Arc<dyn EventLogGateway>,
}

impl RangeLoader {
    pub fn new(gateway: Arc<dyn EventLogGateway>) -> Self {
        Self { gateway }
    }

    /// Load the events of `range` that pass `filter`.
    ///
    /// A pure read: loading the same range again replaces its contents with
    /// identical events. Rows that fail to decode are kept as poison
    /// entries rather than failing the load.
    pub async fn load(&self, range: &mut EventRange, filter: &EventFilter) -> Result<()> {
        let rows = self
            .gateway
            .read_range(range.floor, range.ceiling, filter)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        let mut poison = Vec::new();
        for row in &rows {
            match decode(row) {
                Ok(event) => events.push(event),
                Err(p) => poison.push(p),
            }
        }

        debug!(
            shard = %range.shard,
            floor = range.floor,
            ceiling = range.ceiling,
            events = events.len(),
            poison = poison.len(),
            "Loaded event range"
        );
        range.load(events, poison);
        Ok(())
    }
}

/// Decode a stored row into an [`Event`].
pub fn decode(row: &RawEvent) -> std::result::Result<Event, PoisonEvent> {
    let poison = |reason: String| PoisonEvent {
        sequence: row.sequence,
        stream_id: row.stream_id.clone(),
        event_type: row.event_type.clone(),
        reason,
    };

    let data = serde_json::from_str(&row.data).map_err(|e| poison(format!("invalid payload: {}", e)))?;
    let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
        .map_err(|e| poison(format!("invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(Event {
        sequence: row.sequence,
        stream_id: row.stream_id.clone(),
        version: row.version,
        event_type: row.event_type.clone(),
        aggregate_type_name: row.stream_type.clone(),
        tenant_id: row.tenant_id.clone(),
        timestamp,
        data,
    })
}
