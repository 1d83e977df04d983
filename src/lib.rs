//! Waymark - asynchronous projection daemon
//!
//! Keeps derived read models ("projections") in sync with an append-only,
//! strictly ordered event log. Each projection runs as one or more shards
//! that read the log in bounded ranges, apply business logic, and commit
//! their documents together with their read cursor.

pub mod config;
pub mod coordination;
pub mod daemon;
pub mod dlq;
pub mod interfaces;
pub mod projections;
pub mod storage;
pub mod utils;

pub use coordination::{CoordinatorHandle, NodeCoordinator};
pub use daemon::{
    DaemonError, ProjectionDaemon, ProjectionDaemonBuilder, ShardName, ShardState, ShardStateBus,
    ShardStatus,
};
pub use interfaces::{
    AsyncEventProjection, BatchProjection, Event, EventProjection, ProjectionDefinition,
    ProjectionError, ProjectionHandler, ProjectionSession,
};
pub use storage::Storage;
