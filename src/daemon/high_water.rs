//! High-water mark tracking.
//!
//! The tracker polls the gap detector from the last published mark. A gap
//! is not trusted at first: it may be a transaction that reserved its
//! sequence but has not committed. Only once a gap has stayed open for the
//! stale-sequence threshold does the tracker step over it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::gap_detector::GapDetector;
use super::shard::ShardState;
use super::state_bus::ShardStateBus;
use crate::config::HighWaterConfig;
use crate::interfaces::{ProgressStore, Result, StorageError, HIGH_WATER_MARK_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Polling,
    Published,
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighWaterStatus {
    /// Nothing beyond the mark.
    CaughtUp,
    /// The mark advanced to this sequence.
    Changed(i64),
    /// A gap starting at `at` is inside its grace period.
    GapPending { at: i64 },
    /// The gap `[from, to]` went stale and was stepped over.
    Skipped { from: i64, to: i64 },
}

pub struct HighWaterTracker {
    detector: GapDetector,
    progress: Arc<dyn ProgressStore>,
    bus: Arc<ShardStateBus>,
    config: HighWaterConfig,
    mark: i64,
    state: TrackerState,
    gap_since: Option<Instant>,
}

impl HighWaterTracker {
    pub fn new(
        detector: GapDetector,
        progress: Arc<dyn ProgressStore>,
        bus: Arc<ShardStateBus>,
        config: HighWaterConfig,
    ) -> Self {
        Self {
            detector,
            progress,
            bus,
            config,
            mark: 0,
            state: TrackerState::Idle,
            gap_since: None,
        }
    }

    pub fn mark(&self) -> i64 {
        self.mark
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Resume from the persisted mark, if any.
    pub async fn initialize(&mut self) -> Result<()> {
        if !self.config.persist_mark {
            return Ok(());
        }
        let stored = self.progress.fetch_progress(HIGH_WATER_MARK_KEY).await?;
        if stored > self.mark {
            info!(mark = stored, "Resuming from persisted high-water mark");
            self.mark = stored;
            self.state = TrackerState::Published;
            self.bus.publish(ShardState::high_water(stored));
        }
        Ok(())
    }

    /// Run one probe and publish if the mark moves.
    pub async fn check(&mut self) -> Result<HighWaterStatus> {
        self.state = TrackerState::Polling;
        let result = self.probe().await;
        self.state = if self.mark > 0 {
            TrackerState::Published
        } else {
            TrackerState::Idle
        };
        result
    }

    async fn probe(&mut self) -> Result<HighWaterStatus> {
        let probe = self.detector.detect(self.mark).await?;

        if probe.safe_ceiling > self.mark {
            self.gap_since = None;
            self.publish(probe.safe_ceiling).await;
            return Ok(HighWaterStatus::Changed(probe.safe_ceiling));
        }

        if !probe.has_gap() {
            self.gap_since = None;
            return Ok(HighWaterStatus::CaughtUp);
        }

        let gap = self.mark + 1;
        let since = *self.gap_since.get_or_insert_with(Instant::now);
        if since.elapsed() < self.config.stale_threshold() {
            debug!(gap, "Gap inside grace period");
            return Ok(HighWaterStatus::GapPending { at: gap });
        }

        let Some(next) = self.detector.next_after(self.mark).await? else {
            // The tail vanished between queries; re-probe next tick.
            self.gap_since = None;
            return Ok(HighWaterStatus::CaughtUp);
        };
        let resumed = self.detector.detect(next - 1).await?;
        let ceiling = resumed.safe_ceiling.max(next);

        warn!(
            from = gap,
            to = next - 1,
            stale_after_ms = self.config.stale_sequence_threshold_ms,
            "Skipping stale gap in event log"
        );
        self.gap_since = None;
        self.publish(ceiling).await;
        Ok(HighWaterStatus::Skipped {
            from: gap,
            to: next - 1,
        })
    }

    async fn publish(&mut self, mark: i64) {
        let previous = self.mark;
        self.mark = mark;
        self.bus.publish(ShardState::high_water(mark));
        debug!(previous, mark, "High-water mark advanced");

        if self.config.persist_mark {
            if let Err(e) = self.persist(previous, mark).await {
                warn!(error = %e, mark, "Failed to persist high-water mark");
            }
        }
    }

    async fn persist(&self, previous: i64, mark: i64) -> Result<()> {
        match self
            .progress
            .update_progress(HIGH_WATER_MARK_KEY, previous, mark)
            .await
        {
            Err(StorageError::ProgressionOutOfOrder { actual, .. }) if actual < mark => {
                self.progress
                    .update_progress(HIGH_WATER_MARK_KEY, actual, mark)
                    .await
            }
            Err(StorageError::ProgressionOutOfOrder { actual, .. }) => {
                debug!(actual, mark, "Persisted high-water mark already ahead");
                Ok(())
            }
            other => other,
        }
    }

    /// Run the polling loop as a background task.
    pub fn spawn(mut self) -> HighWaterHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            if let Err(e) = self.initialize().await {
                warn!(error = %e, "Could not load persisted high-water mark");
            }
            info!("High-water tracker started");

            loop {
                let delay = match self.check().await {
                    Ok(HighWaterStatus::CaughtUp) => self.config.slow_polling(),
                    Ok(_) => self.config.fast_polling(),
                    Err(e) => {
                        warn!(error = %e, "High-water probe failed");
                        self.config.slow_polling()
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(mark = self.mark, "High-water tracker stopped");
        });

        HighWaterHandle {
            cancel: cancel_tx,
            task,
        }
    }
}

/// Handle to a running tracker task.
pub struct HighWaterHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HighWaterHandle {
    /// Signal the tracker to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "High-water tracker task failed");
        }
    }
}
