//! Work units handed from the scheduler to a shard worker.

use std::fmt;

use super::shard::ShardName;
use crate::interfaces::Event;

/// A log entry whose payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonEvent {
    pub sequence: i64,
    pub stream_id: String,
    pub event_type: String,
    pub reason: String,
}

/// Half-open interval `(floor, ceiling]` of one shard's log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRange {
    pub shard: ShardName,
    pub floor: i64,
    pub ceiling: i64,
    events: Option<Vec<Event>>,
    poison: Vec<PoisonEvent>,
    truncated_at: Option<i64>,
}

impl EventRange {
    pub fn new(shard: ShardName, floor: i64, ceiling: i64) -> Self {
        Self {
            shard,
            floor,
            ceiling: ceiling.max(floor),
            events: None,
            poison: Vec::new(),
            truncated_at: None,
        }
    }

    /// Width before loading, event count after.
    pub fn size(&self) -> i64 {
        match &self.events {
            Some(events) => events.len() as i64,
            None => self.ceiling - self.floor,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.events.is_some()
    }

    /// Replace the loaded contents. Both lists are ascending by sequence.
    pub fn load(&mut self, events: Vec<Event>, poison: Vec<PoisonEvent>) {
        self.events = Some(events);
        self.poison = poison;
        self.truncated_at = None;
    }

    pub fn events(&self) -> &[Event] {
        self.events.as_deref().unwrap_or(&[])
    }

    pub fn poison(&self) -> &[PoisonEvent] {
        &self.poison
    }

    /// Drop every event at or above `sequence`.
    ///
    /// The range then commits only up to `sequence - 1`.
    pub fn skip_event_sequence(&mut self, sequence: i64) {
        if let Some(events) = &mut self.events {
            events.retain(|e| e.sequence < sequence);
        }
        self.poison.retain(|p| p.sequence < sequence);
        let point = sequence.clamp(self.floor + 1, self.ceiling + 1);
        self.truncated_at = Some(self.truncated_at.map_or(point, |t| t.min(point)));
    }

    pub fn truncated_at(&self) -> Option<i64> {
        self.truncated_at
    }

    /// Sequence the shard's cursor moves to when this range commits.
    pub fn commit_ceiling(&self) -> i64 {
        match self.truncated_at {
            Some(sequence) => sequence - 1,
            None => self.ceiling,
        }
    }
}

impl fmt::Display for EventRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}]", self.shard, self.floor, self.ceiling)
    }
}

/// A range plus its retry bookkeeping while a worker processes it.
#[derive(Debug)]
pub struct EventRangeGroup {
    range: EventRange,
    attempts: i32,
    cancelled: bool,
    last_error: Option<String>,
}

impl EventRangeGroup {
    pub fn new(range: EventRange) -> Self {
        Self {
            range,
            attempts: -1,
            cancelled: false,
            last_error: None,
        }
    }

    pub fn range(&self) -> &EventRange {
        &self.range
    }

    pub fn range_mut(&mut self) -> &mut EventRange {
        &mut self.range
    }

    pub fn into_range(self) -> EventRange {
        self.range
    }

    /// -1 until the first `reset`.
    pub fn attempts(&self) -> i32 {
        self.attempts
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Prepare for another attempt.
    pub fn reset(&mut self) {
        self.attempts += 1;
        self.cancelled = false;
        self.last_error = None;
    }

    /// Cancel the current attempt and remember why.
    pub fn abort(&mut self, error: impl fmt::Display) {
        self.cancelled = true;
        self.last_error = Some(error.to_string());
    }
}
