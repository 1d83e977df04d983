//! The asynchronous projection daemon.
//!
//! Components, leaf first:
//! - [`ShardStateBus`]: fan-out of shard progress and the high-water mark
//! - [`HighWaterTracker`]: finds the highest contiguous sequence in the log
//! - [`RangeScheduler`]: carves the gap between progress and high water
//!   into bounded ranges
//! - [`ShardWorker`]: loads, applies and commits ranges for one shard
//! - [`ProjectionDaemon`]: owns the workers and the tracker

pub mod error;
pub mod gap_detector;
pub mod high_water;
pub mod loader;
pub mod range;
pub mod rebuild;
pub mod scheduler;
pub mod shard;
pub mod state_bus;
pub mod supervisor;
pub mod worker;

pub use error::{DaemonError, Result};
pub use gap_detector::GapDetector;
pub use high_water::{HighWaterHandle, HighWaterStatus, HighWaterTracker, TrackerState};
pub use loader::RangeLoader;
pub use range::{EventRange, EventRangeGroup, PoisonEvent};
pub use rebuild::RebuildCoordinator;
pub use scheduler::RangeScheduler;
pub use shard::{
    ShardAction, ShardName, ShardState, ShardStatus, ALL_GROUP, HIGH_WATER_IDENTITY,
};
pub use state_bus::ShardStateBus;
pub use supervisor::{ProjectionDaemon, ProjectionDaemonBuilder};
pub use worker::{ShardWorker, ShardWorkerHandle, WorkerStatus};
