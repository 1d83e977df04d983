//! Contiguous-ceiling detection over the event log.

use std::sync::Arc;

use tracing::debug;

use crate::interfaces::{EventLogGateway, GapProbe, Result};

/// Finds how far the log is known to have no holes.
#[derive(Clone)]
pub struct GapDetector {
    gateway: Arc<dyn EventLogGateway>,
}

impl GapDetector {
    pub fn new(gateway: Arc<dyn EventLogGateway>) -> Self {
        Self { gateway }
    }

    /// Probe the log from `start`.
    ///
    /// `safe_ceiling == start` both when nothing follows `start` and when
    /// `start + 1` is missing; `has_gap()` tells the two apart.
    pub async fn detect(&self, start: i64) -> Result<GapProbe> {
        let probe = self.gateway.detect_gap(start).await?;
        debug!(
            start,
            safe_ceiling = probe.safe_ceiling,
            highest_sequence = probe.highest_sequence,
            "Gap probe"
        );
        Ok(probe)
    }

    /// First sequence present after `sequence`, used to step over a gap.
    pub async fn next_after(&self, sequence: i64) -> Result<Option<i64>> {
        self.gateway.first_sequence_after(sequence).await
    }
}
