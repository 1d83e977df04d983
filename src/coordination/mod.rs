//! Node coordination: decides whether this node runs the daemon.
//!
//! - `Disabled`: never start
//! - `Solo`: start immediately, stop on shutdown
//! - `HotCold`: run only while holding the cluster lease
//!
//! In hot/cold mode a leader that cannot prove it still holds the lease
//! stops every local shard before it stops calling itself leader. The
//! lease expires on its own, so a crashed leader is replaced within
//! `lease_ttl + acquire_interval`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{DaemonMode, NodeConfig};
use crate::daemon::ProjectionDaemon;
use crate::interfaces::{DistributedLease, Result, StorageError};

/// Runs the leadership loop for one node.
pub struct NodeCoordinator {
    daemon: Arc<ProjectionDaemon>,
    lease: Arc<dyn DistributedLease>,
    config: NodeConfig,
}

/// Handle to a running coordinator.
pub struct CoordinatorHandle {
    leader: watch::Receiver<bool>,
    step_down: mpsc::Sender<()>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Whether this node currently runs the daemon.
    pub fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    pub fn watch_leader(&self) -> watch::Receiver<bool> {
        self.leader.clone()
    }

    /// Hand leadership to another node.
    ///
    /// Stops the local shards, releases the lease and skips one acquire
    /// round. Ignored unless in hot/cold mode.
    pub fn step_down(&self) {
        let _ = self.step_down.try_send(());
    }

    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the coordinator; the daemon is stopped and the lease released.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Coordinator task failed");
        }
    }
}

impl NodeCoordinator {
    pub fn new(
        daemon: Arc<ProjectionDaemon>,
        lease: Arc<dyn DistributedLease>,
        config: NodeConfig,
    ) -> Self {
        Self {
            daemon,
            lease,
            config,
        }
    }

    pub fn spawn(self) -> CoordinatorHandle {
        let (leader_tx, leader_rx) = watch::channel(false);
        let (step_tx, step_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            match self.config.mode {
                DaemonMode::Disabled => {
                    info!("Projection daemon disabled on this node");
                }
                DaemonMode::Solo => self.run_solo(leader_tx, cancel_rx).await,
                DaemonMode::HotCold => {
                    HotCold::new(self, leader_tx)
                        .run(step_rx, cancel_rx)
                        .await
                }
            }
        });

        CoordinatorHandle {
            leader: leader_rx,
            step_down: step_tx,
            cancel: cancel_tx,
            task,
        }
    }

    async fn run_solo(&self, leader: watch::Sender<bool>, mut cancel: watch::Receiver<bool>) {
        info!(node = %self.config.node_id, "Running projection daemon in solo mode");
        if let Err(e) = self.daemon.start_all().await {
            error!(error = %e, "Failed to start projection daemon");
            return;
        }
        let _ = leader.send(true);

        wait_for_cancel(&mut cancel).await;

        let _ = leader.send(false);
        if let Err(e) = self.daemon.stop_all().await {
            warn!(error = %e, "Failed to stop projection daemon");
        }
    }
}

/// Hot/cold leadership state machine.
struct HotCold {
    node: NodeCoordinator,
    leader: watch::Sender<bool>,
    /// Last moment the lease was known to be ours.
    held_since: Option<Instant>,
}

impl HotCold {
    fn new(node: NodeCoordinator, leader: watch::Sender<bool>) -> Self {
        Self {
            node,
            leader,
            held_since: None,
        }
    }

    fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    #[tracing::instrument(name = "coordinator.hot_cold", skip_all, fields(node = %self.node.config.node_id))]
    async fn run(mut self, mut step_down: mpsc::Receiver<()>, mut cancel: watch::Receiver<bool>) {
        info!(
            node = %self.node.config.node_id,
            lock = %self.node.config.lock_name,
            "Competing for projection daemon lease"
        );

        loop {
            let delay = if self.is_leader() {
                self.renew().await
            } else {
                self.acquire().await
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Some(()) = step_down.recv() => {
                    if self.is_leader() {
                        info!(node = %self.node.config.node_id, "Stepping down from daemon leadership");
                        self.demote().await;
                        self.release().await;
                        // Sit out a round so another node can take over.
                        if sleep_or_cancel(self.node.config.acquire_interval(), &mut cancel).await {
                            break;
                        }
                    }
                }
                _ = wait_for_cancel(&mut cancel) => break,
            }
        }

        if self.is_leader() {
            self.demote().await;
            self.release().await;
        }
        debug!(node = %self.node.config.node_id, "Coordinator stopped");
    }

    /// Follower round. Returns the delay before the next round.
    async fn acquire(&mut self) -> Duration {
        let config = self.node.config.clone();
        let attempt_started = Instant::now();
        let acquired = self
            .lease_call(self.node.lease.try_acquire(
                &config.lock_name,
                &config.node_id,
                config.lease_ttl(),
            ))
            .await;

        match acquired {
            Ok(true) => {
                self.held_since = Some(attempt_started);
                info!(node = %config.node_id, "Acquired daemon lease, starting shards");
                match self.node.daemon.start_all().await {
                    Ok(()) => {
                        let _ = self.leader.send(true);
                        config.renew_interval()
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to start projection daemon");
                        self.node.daemon.stop_all().await.ok();
                        self.release().await;
                        config.acquire_interval()
                    }
                }
            }
            Ok(false) => config.acquire_interval(),
            Err(e) => {
                debug!(error = %e, "Lease acquisition failed");
                config.acquire_interval()
            }
        }
    }

    /// Leader round. Returns the delay before the next round.
    async fn renew(&mut self) -> Duration {
        let config = self.node.config.clone();
        let attempt_started = Instant::now();
        let renewed = self
            .lease_call(self.node.lease.renew(
                &config.lock_name,
                &config.node_id,
                config.lease_ttl(),
            ))
            .await;

        match renewed {
            Ok(true) => {
                self.held_since = Some(attempt_started);
                config.renew_interval()
            }
            Ok(false) => {
                warn!(node = %config.node_id, "Daemon lease taken by another node");
                self.demote().await;
                config.acquire_interval()
            }
            Err(e) => {
                // Expiry is measured from when the last successful call began.
                let expires_at = self
                    .held_since
                    .map(|t| t + config.lease_ttl())
                    .unwrap_or_else(Instant::now);
                if Instant::now() + config.renew_interval() >= expires_at {
                    warn!(
                        node = %config.node_id,
                        error = %e,
                        "Lease renewal keeps failing, stopping shards before it expires"
                    );
                    self.demote().await;
                    self.release().await;
                    config.acquire_interval()
                } else {
                    warn!(error = %e, "Lease renewal failed, retrying");
                    config.renew_interval()
                }
            }
        }
    }

    /// Stop every local shard, then drop leadership.
    async fn demote(&mut self) {
        if let Err(e) = self.node.daemon.stop_all().await {
            warn!(error = %e, "Failed to stop projection daemon");
        }
        self.held_since = None;
        let _ = self.leader.send(false);
        info!(node = %self.node.config.node_id, "Daemon leadership relinquished");
    }

    async fn release(&self) {
        let config = &self.node.config;
        let released = self
            .lease_call(self.node.lease.release(&config.lock_name, &config.node_id))
            .await;
        if let Err(e) = released {
            debug!(error = %e, "Lease release failed; it will expire on its own");
        }
    }

    /// Bound a lease call so a hung store cannot outlive the lease.
    async fn lease_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.node.config.renew_interval();
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StorageError::Unavailable(format!("lease call timed out after {:?}", limit)))?
    }
}

async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Returns true if cancelled while sleeping.
async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_for_cancel(cancel) => true,
    }
}
