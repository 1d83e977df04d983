//! Logging projection for debugging and testing.

use tracing::info;

use crate::interfaces::{Event, EventProjection, ProjectionError, ProjectionSession};

/// Projection that logs every event it receives and writes nothing.
///
/// Useful for checking that a shard is reading the log.
pub struct LoggingProjection {
    name: String,
}

impl LoggingProjection {
    pub const NAME: &'static str = "logging";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl EventProjection for LoggingProjection {
    fn apply(
        &self,
        event: &Event,
        _session: &mut ProjectionSession<'_>,
    ) -> Result<(), ProjectionError> {
        info!(
            projection = %self.name,
            sequence = event.sequence,
            stream = %event.stream_id,
            version = event.version,
            event_type = %event.event_type,
            tenant = %event.tenant_id,
            "Event received"
        );
        Ok(())
    }
}
