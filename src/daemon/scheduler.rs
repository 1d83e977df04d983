//! Per-shard backpressure.
//!
//! Sliding-window flow control over the log: the window is the hopper,
//! the segment is the batch size. Ranges are accounted at their width when
//! enqueued and released by that same amount when they commit, so the
//! in-flight total never exceeds the hopper.

use std::collections::BTreeMap;

use tracing::debug;

use super::range::EventRange;
use super::shard::ShardName;
use crate::config::AsyncOptions;

pub struct RangeScheduler {
    shard: ShardName,
    batch_size: i64,
    hopper_size: i64,
    high_water: i64,
    last_enqueued: i64,
    last_committed: i64,
    in_flight: i64,
    // floor -> accounted size
    outstanding: BTreeMap<i64, i64>,
}

impl RangeScheduler {
    pub fn new(shard: ShardName, options: &AsyncOptions) -> Self {
        Self {
            shard,
            batch_size: options.batch_size.max(1),
            hopper_size: options.maximum_hopper_size.max(1),
            high_water: 0,
            last_enqueued: 0,
            last_committed: 0,
            in_flight: 0,
            outstanding: BTreeMap::new(),
        }
    }

    /// Begin scheduling from the shard's committed progress.
    pub fn start(&mut self, high_water: i64, progress: i64) -> Vec<EventRange> {
        self.outstanding.clear();
        self.in_flight = 0;
        self.high_water = high_water;
        self.last_enqueued = progress;
        self.last_committed = progress;
        self.fill()
    }

    /// The log's safe ceiling moved.
    pub fn mark_high_water(&mut self, mark: i64) -> Vec<EventRange> {
        if mark > self.high_water {
            self.high_water = mark;
        }
        self.fill()
    }

    /// A range committed; release its capacity.
    pub fn event_range_updated(&mut self, range: &EventRange) -> Vec<EventRange> {
        if let Some(size) = self.outstanding.remove(&range.floor) {
            self.in_flight -= size;
        }
        self.last_committed = self.last_committed.max(range.commit_ceiling());
        self.fill()
    }

    pub fn in_flight_count(&self) -> i64 {
        self.in_flight
    }

    pub fn last_enqueued(&self) -> i64 {
        self.last_enqueued
    }

    pub fn last_committed(&self) -> i64 {
        self.last_committed
    }

    pub fn high_water(&self) -> i64 {
        self.high_water
    }

    fn fill(&mut self) -> Vec<EventRange> {
        let mut ranges = Vec::new();
        while self.last_enqueued < self.high_water {
            let capacity = self.hopper_size - self.in_flight;
            if capacity <= 0 {
                break;
            }
            let size = self
                .batch_size
                .min(self.high_water - self.last_enqueued)
                .min(capacity);
            let floor = self.last_enqueued;
            let range = EventRange::new(self.shard.clone(), floor, floor + size);

            self.outstanding.insert(floor, size);
            self.in_flight += size;
            self.last_enqueued = floor + size;
            ranges.push(range);
        }

        if !ranges.is_empty() {
            debug!(
                shard = %self.shard,
                ranges = ranges.len(),
                last_enqueued = self.last_enqueued,
                in_flight = self.in_flight,
                "Enqueued event ranges"
            );
        }
        ranges
    }
}
