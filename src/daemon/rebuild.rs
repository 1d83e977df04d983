//! Projection rebuild.
//!
//! A rebuild always covers a whole projection: its shards share the
//! collections being wiped, so rebuilding one tenant shard alone would
//! drop the other tenants' documents. Other projections keep running.
//!
//! Only the node that owns the shards may rebuild. Ownership is checked
//! again before every destructive step and before the restart, so a node
//! that loses it part way through stops instead of racing the new owner.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use super::error::{DaemonError, Result};
use super::gap_detector::GapDetector;
use super::shard::ShardName;
use super::supervisor::ProjectionDaemon;
use crate::interfaces::ProjectionDefinition;

pub struct RebuildCoordinator<'a> {
    daemon: &'a ProjectionDaemon,
}

impl<'a> RebuildCoordinator<'a> {
    pub fn new(daemon: &'a ProjectionDaemon) -> Self {
        Self { daemon }
    }

    /// Rebuild the projection named by `name` or owning the shard `name`.
    ///
    /// On failure, including loss of ownership, the projection's shards are
    /// left stopped.
    #[tracing::instrument(name = "projection.rebuild", skip_all, fields(%name))]
    pub async fn rebuild(&self, name: &str, timeout: Duration) -> Result<()> {
        let definition = self.definition_for(name)?;
        let targets: Vec<(ShardName, Arc<ProjectionDefinition>)> = definition
            .shard_names()
            .into_iter()
            .map(|shard| (shard, definition.clone()))
            .collect();

        info!(projection = %definition.name(), shards = targets.len(), "Rebuilding projection");
        match self.replay(&definition, &targets, timeout).await {
            Ok(()) => {
                info!(projection = %definition.name(), "Projection rebuilt");
                Ok(())
            }
            Err(e) => {
                error!(projection = %definition.name(), error = %e, "Projection rebuild failed");
                for (shard, _) in &targets {
                    self.daemon.stop_worker(shard.identity()).await;
                }
                Err(DaemonError::RebuildFailed {
                    projection: definition.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn definition_for(&self, name: &str) -> Result<Arc<ProjectionDefinition>> {
        let (_, definition) = self
            .daemon
            .resolve(name)?
            .into_iter()
            .next()
            .ok_or_else(|| DaemonError::UnknownShard(name.to_string()))?;
        Ok(definition)
    }

    async fn replay(
        &self,
        definition: &ProjectionDefinition,
        targets: &[(ShardName, Arc<ProjectionDefinition>)],
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let storage = self.daemon.storage();
        let bus = self.daemon.tracker();

        self.daemon.check_owned()?;
        for (shard, _) in targets {
            self.daemon.stop_worker(shard.identity()).await;
        }

        for collection in definition.collections() {
            self.daemon.check_owned()?;
            let deleted = storage.documents.delete_collection(collection).await?;
            info!(collection = %collection, deleted, "Cleared projection collection");
        }

        for (shard, _) in targets {
            self.daemon.check_owned()?;
            storage.progress.reset_progress(shard.identity()).await?;
            bus.reset(shard.identity());
        }

        // Replay up to the contiguous head as of now, even if the tracker
        // has not published it yet.
        self.daemon.ensure_tracker().await?;
        let published = bus.high_water();
        let probe = GapDetector::new(storage.event_log.clone())
            .detect(published)
            .await?;
        let target = probe.safe_ceiling.max(published);

        self.daemon.start_shards(targets).await?;
        for (shard, _) in targets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            bus.wait_for_shard_state(shard.identity(), target, remaining)
                .await?;
        }
        Ok(())
    }
}
