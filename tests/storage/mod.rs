//! Shared storage integration tests.
//!
//! Tests the EventLogGateway, ProgressStore, DocumentStore, DeadLetterSink and
//! DistributedLease contracts against all implementations. Each backend
//! module imports these test functions and runs them.

#![allow(dead_code)]

pub mod dead_letter_tests;
pub mod event_log_tests;
pub mod lease_tests;
pub mod progress_store_tests;

use async_trait::async_trait;
use waymark::storage::{EventLogGateway, RawEvent};

/// Event log that tests can write to.
///
/// Appending belongs to the event store, not the gateway trait, so each
/// backend supplies its own way in.
#[async_trait]
pub trait SeedableEventLog: EventLogGateway {
    async fn seed(&self, event: RawEvent);
}

/// Shard or lease name no other test run will use.
pub fn unique(prefix: &str) -> String {
    format!("test_{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
