//! Projection daemon: owns the shard workers and the high-water tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{DaemonError, Result};
use super::gap_detector::GapDetector;
use super::high_water::{HighWaterHandle, HighWaterTracker};
use super::rebuild::RebuildCoordinator;
use super::shard::{ShardName, ShardStatus};
use super::state_bus::ShardStateBus;
use super::worker::{ShardWorker, ShardWorkerHandle, WorkerStatus};
use crate::config::DaemonConfig;
use crate::interfaces::{ProjectionDefinition, ProjectionProgress};
use crate::storage::Storage;

/// Builder for [`ProjectionDaemon`].
pub struct ProjectionDaemonBuilder {
    storage: Storage,
    config: DaemonConfig,
    projections: Vec<ProjectionDefinition>,
}

impl ProjectionDaemonBuilder {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            config: DaemonConfig::default(),
            projections: Vec::new(),
        }
    }

    pub fn config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn projection(mut self, definition: ProjectionDefinition) -> Self {
        self.projections.push(definition);
        self
    }

    pub fn projections<I>(mut self, definitions: I) -> Self
    where
        I: IntoIterator<Item = ProjectionDefinition>,
    {
        self.projections.extend(definitions);
        self
    }

    /// Fails if two projections share a name.
    pub fn build(self) -> Result<ProjectionDaemon> {
        let mut projections: Vec<Arc<ProjectionDefinition>> = Vec::new();
        for definition in self.projections {
            if projections.iter().any(|p| p.name() == definition.name()) {
                return Err(DaemonError::DuplicateProjection(definition.name().to_string()));
            }
            projections.push(Arc::new(definition));
        }

        Ok(ProjectionDaemon {
            storage: self.storage,
            config: Arc::new(self.config),
            bus: Arc::new(ShardStateBus::new()),
            projections,
            owned: AtomicBool::new(false),
            workers: Mutex::new(HashMap::new()),
            tracker: Mutex::new(None),
        })
    }
}

/// Supervisor for every registered projection shard.
///
/// Start and stop are idempotent and may be called repeatedly, which is
/// how node coordination hands the daemon between leader and follower.
///
/// `start_all` makes this node the owner of every shard and `stop_all`
/// gives that up. While not owned, nothing may start a worker or the
/// tracker, and rebuilds are refused.
pub struct ProjectionDaemon {
    storage: Storage,
    config: Arc<DaemonConfig>,
    bus: Arc<ShardStateBus>,
    projections: Vec<Arc<ProjectionDefinition>>,
    /// Cleared before shutting workers down and checked under the
    /// workers/tracker locks before starting them.
    owned: AtomicBool,
    workers: Mutex<HashMap<String, ShardWorkerHandle>>,
    tracker: Mutex<Option<HighWaterHandle>>,
}

impl ProjectionDaemon {
    pub fn builder(storage: Storage) -> ProjectionDaemonBuilder {
        ProjectionDaemonBuilder::new(storage)
    }

    /// Progress and high-water observer shared by every shard.
    pub fn tracker(&self) -> &Arc<ShardStateBus> {
        &self.bus
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn projection(&self, name: &str) -> Option<&Arc<ProjectionDefinition>> {
        self.projections.iter().find(|p| p.name() == name)
    }

    /// Every shard of every registered projection.
    pub fn shard_names(&self) -> Vec<ShardName> {
        self.projections
            .iter()
            .flat_map(|p| p.shard_names())
            .collect()
    }

    /// Whether this node currently owns the shards.
    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::SeqCst)
    }

    /// Take ownership, then start the tracker and every shard that is not
    /// already active.
    pub async fn start_all(&self) -> Result<()> {
        self.owned.store(true, Ordering::SeqCst);
        self.ensure_tracker().await?;
        let mut workers = self.workers.lock().await;
        self.check_owned()?;
        for definition in &self.projections {
            for shard in definition.shard_names() {
                self.start_worker(&mut workers, shard, definition.clone())
                    .await;
            }
        }
        info!(shards = workers.len(), "Projection daemon started");
        Ok(())
    }

    /// Give up ownership, then stop every shard and the tracker.
    ///
    /// Waits for each worker to exit. Errored shards are discarded so the
    /// next `start_all` gives them a fresh worker.
    pub async fn stop_all(&self) -> Result<()> {
        self.owned.store(false, Ordering::SeqCst);
        let handles: Vec<ShardWorkerHandle> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, handle)| handle).collect()
        };
        let stopped = handles.len();
        join_all(handles.into_iter().map(|handle| handle.shutdown())).await;

        if let Some(tracker) = self.tracker.lock().await.take() {
            tracker.shutdown().await;
        }
        if stopped > 0 {
            info!(shards = stopped, "Projection daemon stopped");
        }
        Ok(())
    }

    /// Start one shard by identity, or every shard of a projection by name.
    ///
    /// Fails with `NotOwner` unless `start_all` has claimed the shards.
    pub async fn start_shard(&self, name: &str) -> Result<()> {
        let targets = self.resolve(name)?;
        self.ensure_tracker().await?;
        self.start_shards(&targets).await
    }

    /// Stop one shard by identity, or every shard of a projection by name.
    pub async fn stop_shard(&self, name: &str) -> Result<()> {
        let targets = self.resolve(name)?;
        for (shard, _) in targets {
            self.stop_worker(shard.identity()).await;
        }
        Ok(())
    }

    /// Current status of a shard, or of a projection's shards.
    ///
    /// Shards never started read as `Stopped`. For a projection with
    /// several groups the first shard that is not `Running` wins, so a
    /// single errored tenant shows up.
    pub async fn status_for(&self, name: &str) -> Result<ShardStatus> {
        let targets = self.resolve(name)?;
        let workers = self.workers.lock().await;
        let statuses: Vec<ShardStatus> = targets
            .iter()
            .map(|(shard, _)| {
                workers
                    .get(shard.identity())
                    .map(|h| h.status())
                    .unwrap_or_default()
            })
            .collect();

        Ok(statuses
            .iter()
            .copied()
            .find(|s| *s != ShardStatus::Running)
            .unwrap_or(ShardStatus::Running))
    }

    /// Detailed status of one shard identity, if it has a worker.
    pub async fn worker_status(&self, identity: &str) -> Option<WorkerStatus> {
        self.workers
            .lock()
            .await
            .get(identity)
            .map(|h| h.snapshot())
    }

    /// Stored cursor of every shard, plus the persisted high-water mark.
    pub async fn all_progress(&self) -> Result<Vec<ProjectionProgress>> {
        Ok(self.storage.progress.fetch_all_progress().await?)
    }

    /// Wipe a projection's documents and replay it from sequence 0.
    ///
    /// Returns once every shard of the projection has caught up to the
    /// high-water mark observed when the replay started.
    pub async fn rebuild_projection(&self, name: &str, timeout: Duration) -> Result<()> {
        RebuildCoordinator::new(self).rebuild(name, timeout).await
    }

    /// Wait until every live worker has reached the log's current head.
    pub async fn wait_for_non_stale_data(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let target = self.storage.event_log.highest_sequence().await?;
        let identities: Vec<String> = {
            let workers = self.workers.lock().await;
            workers
                .values()
                .filter(|h| !h.is_finished())
                .map(|h| h.shard().identity().to_string())
                .collect()
        };

        debug!(target, shards = identities.len(), "Waiting for non-stale data");
        for identity in identities {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.bus
                .wait_for_shard_state(&identity, target, remaining)
                .await?;
        }
        Ok(())
    }

    /// Stop everything and close the state bus.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_all().await?;
        self.bus.complete();
        Ok(())
    }

    /// Resolve a shard identity or projection name to its shards.
    pub(crate) fn resolve(
        &self,
        name: &str,
    ) -> Result<Vec<(ShardName, Arc<ProjectionDefinition>)>> {
        if let Some(definition) = self.projection(name) {
            return Ok(definition
                .shard_names()
                .into_iter()
                .map(|shard| (shard, definition.clone()))
                .collect());
        }

        for definition in &self.projections {
            if let Some(shard) = definition
                .shard_names()
                .into_iter()
                .find(|s| s.identity() == name)
            {
                return Ok(vec![(shard, definition.clone())]);
            }
        }
        Err(DaemonError::UnknownShard(name.to_string()))
    }

    pub(crate) fn check_owned(&self) -> Result<()> {
        if self.is_owned() {
            Ok(())
        } else {
            Err(DaemonError::NotOwner)
        }
    }

    pub(crate) async fn ensure_tracker(&self) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        self.check_owned()?;
        if tracker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let handle = HighWaterTracker::new(
            GapDetector::new(self.storage.event_log.clone()),
            self.storage.progress.clone(),
            self.bus.clone(),
            self.config.high_water.clone(),
        )
        .spawn();
        *tracker = Some(handle);
        Ok(())
    }

    pub(crate) async fn start_shards(
        &self,
        targets: &[(ShardName, Arc<ProjectionDefinition>)],
    ) -> Result<()> {
        let mut workers = self.workers.lock().await;
        self.check_owned()?;
        for (shard, definition) in targets {
            self.start_worker(&mut workers, shard.clone(), definition.clone())
                .await;
        }
        Ok(())
    }

    pub(crate) async fn stop_worker(&self, identity: &str) {
        let handle = self.workers.lock().await.remove(identity);
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    async fn start_worker(
        &self,
        workers: &mut HashMap<String, ShardWorkerHandle>,
        shard: ShardName,
        definition: Arc<ProjectionDefinition>,
    ) {
        let identity = shard.identity().to_string();
        if let Some(existing) = workers.get(&identity) {
            if existing.status().is_active() && !existing.is_finished() {
                return;
            }
        }
        if let Some(previous) = workers.remove(&identity) {
            previous.shutdown().await;
        }

        let handle = ShardWorker::new(
            shard,
            definition,
            self.storage.clone(),
            self.bus.clone(),
            self.config.clone(),
        )
        .spawn();
        workers.insert(identity, handle);
    }
}
