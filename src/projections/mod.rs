//! Built-in projections.
//!
//! Registered by name from configuration; useful for smoke-testing a
//! deployment and as templates for real projections.

mod logging;
mod stream_summary;

pub use logging::LoggingProjection;
pub use stream_summary::{StreamSummary, StreamSummaryProjection, STREAM_SUMMARY_COLLECTION};

use crate::interfaces::{ProjectionDefinition, ProjectionHandler};

/// Names accepted by [`builtin`].
pub const BUILTIN_NAMES: &[&str] = &[LoggingProjection::NAME, StreamSummaryProjection::NAME];

/// Definition of a built-in projection, if `name` is one.
pub fn builtin(name: &str) -> Option<ProjectionDefinition> {
    match name {
        LoggingProjection::NAME => Some(ProjectionDefinition::new(
            name,
            ProjectionHandler::single(LoggingProjection::new(name)),
        )),
        StreamSummaryProjection::NAME => Some(
            ProjectionDefinition::new(name, ProjectionHandler::asynchronous(StreamSummaryProjection))
                .with_collection(STREAM_SUMMARY_COLLECTION),
        ),
        _ => None,
    }
}
