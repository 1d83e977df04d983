//! Abstract interfaces for waymark components.
//!
//! These traits define the contracts for:
//! - Event log access (ordered reads, gap detection)
//! - Progress persistence (per-shard cursors with ordering checks)
//! - Document persistence (projection output)
//! - Projection callbacks (single-event, async, batched)
//! - Distributed leases (cluster leadership)

pub mod document_store;
pub mod event_log;
pub mod lease;
pub mod progress_store;
pub mod projection;

pub use document_store::{DocumentOp, DocumentStore};
pub use event_log::{EventFilter, EventLogGateway, GapProbe, RawEvent, Result, StorageError};
pub use lease::DistributedLease;
pub use progress_store::{ProgressCommit, ProgressStore, ProjectionProgress, HIGH_WATER_MARK_KEY};
pub use projection::{
    AsyncEventProjection, BatchProjection, Event, EventProjection, ProjectionDefinition,
    ProjectionError, ProjectionHandler, ProjectionSession,
};
