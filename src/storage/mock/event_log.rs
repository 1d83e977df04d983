//! Mock EventLogGateway implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::raw_event;
use crate::storage::{EventFilter, EventLogGateway, GapProbe, RawEvent, Result, StorageError};

/// Mock event log keyed by sequence.
///
/// Sequences may be appended out of order with `append_at` to simulate
/// transactions that commit late.
#[derive(Default)]
pub struct MockEventLog {
    events: RwLock<BTreeMap<i64, RawEvent>>,
    fail_on_read: RwLock<bool>,
    fail_on_detect: RwLock<bool>,
    fail_next_reads: RwLock<usize>,
}

impl MockEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the next sequence after the current maximum.
    pub async fn append(&self, stream_id: &str, event_type: &str, data: Value) -> i64 {
        let mut events = self.events.write().await;
        let sequence = events.keys().next_back().copied().unwrap_or(0) + 1;
        events.insert(sequence, raw_event(sequence, stream_id, event_type, &data));
        sequence
    }

    /// Append at an explicit sequence, leaving any hole below it open.
    pub async fn append_at(&self, sequence: i64, stream_id: &str, event_type: &str, data: Value) {
        self.events
            .write()
            .await
            .insert(sequence, raw_event(sequence, stream_id, event_type, &data));
    }

    /// Insert a fully specified event.
    pub async fn append_raw(&self, event: RawEvent) {
        self.events.write().await.insert(event.sequence, event);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    pub async fn set_fail_on_detect(&self, fail: bool) {
        *self.fail_on_detect.write().await = fail;
    }

    /// Fail the next `count` range reads, then recover.
    pub async fn fail_next_reads(&self, count: usize) {
        *self.fail_next_reads.write().await = count;
    }
}

#[async_trait]
impl EventLogGateway for MockEventLog {
    async fn read_range(&self, floor: i64, ceiling: i64, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        if *self.fail_on_read.read().await {
            return Err(StorageError::Unavailable("event log read failed".to_string()));
        }
        {
            let mut remaining = self.fail_next_reads.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Unavailable("event log read failed".to_string()));
            }
        }
        if ceiling <= floor {
            return Ok(Vec::new());
        }

        let events = self.events.read().await;
        Ok(events
            .range(floor + 1..=ceiling)
            .map(|(_, event)| event)
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    async fn detect_gap(&self, start: i64) -> Result<GapProbe> {
        if *self.fail_on_detect.read().await {
            return Err(StorageError::Unavailable("gap detection failed".to_string()));
        }

        let events = self.events.read().await;
        let mut safe_ceiling = start;
        for &sequence in events.range(start + 1..).map(|(sequence, _)| sequence) {
            if sequence != safe_ceiling + 1 {
                break;
            }
            safe_ceiling = sequence;
        }
        let highest_sequence = events.keys().next_back().copied().unwrap_or(0);

        Ok(GapProbe {
            safe_ceiling,
            highest_sequence,
        })
    }

    async fn highest_sequence(&self) -> Result<i64> {
        Ok(self.events.read().await.keys().next_back().copied().unwrap_or(0))
    }

    async fn first_sequence_after(&self, sequence: i64) -> Result<Option<i64>> {
        Ok(self
            .events
            .read()
            .await
            .range(sequence + 1..)
            .next()
            .map(|(sequence, _)| *sequence))
    }
}
