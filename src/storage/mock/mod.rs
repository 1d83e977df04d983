//! In-memory storage implementations.
//!
//! Used by tests, and by the `memory` storage type for demos. Each store
//! exposes fault-injection switches so retry paths can be exercised.

use std::sync::Arc;

mod dead_letter;
mod event_log;
mod lease;
mod projection_store;

pub use dead_letter::MockDeadLetterSink;
pub use event_log::MockEventLog;
pub use lease::InMemoryLease;
pub use projection_store::MockProjectionStore;

use crate::interfaces::RawEvent;

/// Tenant assigned to events that do not name one.
pub const DEFAULT_TENANT: &str = "*DEFAULT*";

/// Concrete handles behind `Storage::in_memory()`.
#[derive(Clone, Default)]
pub struct MockHandles {
    pub event_log: Arc<MockEventLog>,
    pub projections: Arc<MockProjectionStore>,
    pub dead_letters: Arc<MockDeadLetterSink>,
    pub lease: Arc<InMemoryLease>,
}

/// Build a raw event in the default tenant with no stream type.
pub fn raw_event(sequence: i64, stream_id: &str, event_type: &str, data: &serde_json::Value) -> RawEvent {
    RawEvent {
        sequence,
        stream_id: stream_id.to_string(),
        version: 1,
        event_type: event_type.to_string(),
        stream_type: None,
        tenant_id: DEFAULT_TENANT.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        data: data.to_string(),
    }
}

#[cfg(test)]
mod tests;
