//! Shard worker: one shard's lifecycle.
//!
//! A worker runs a control loop that owns the shard's [`RangeScheduler`]
//! and feeds ranges through two pipeline stages:
//!
//! ```text
//! control --ranges--> load stage --groups--> apply stage --reports--> control
//! ```
//!
//! The load stage reads events for a range; the apply stage runs the
//! projection and commits documents and progress in one transaction.
//! Ranges are applied one at a time in floor order, so commits are strictly
//! ordered even while later ranges are being loaded.
//!
//! Failures are classified as transient (retried with backoff on the same
//! range, then `Paused`), or fatal (`Errored` until an operator restarts or
//! rebuilds the shard).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{DaemonError, Result};
use super::loader::RangeLoader;
use super::range::{EventRange, EventRangeGroup};
use super::scheduler::RangeScheduler;
use super::shard::{ShardAction, ShardName, ShardState, ShardStatus};
use super::state_bus::ShardStateBus;
use crate::config::{ApplyErrorPolicy, AsyncOptions, DaemonConfig, ErrorHandlingConfig, RetryConfig};
use crate::dlq::{DeadLetterEvent, DeadLetterReason};
use crate::interfaces::{
    Event, EventFilter, ProgressCommit, ProjectionDefinition, ProjectionError, ProjectionHandler,
    ProjectionSession, StorageError,
};
use crate::storage::Storage;
use crate::utils::retry::RetryBudget;

/// Observable state of a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub status: ShardStatus,
    /// Last committed sequence.
    pub sequence: i64,
    /// Failure that put the worker in `Paused` or `Errored`.
    pub error: Option<String>,
}

/// Runs one shard of one projection.
pub struct ShardWorker {
    shard: ShardName,
    definition: Arc<ProjectionDefinition>,
    storage: Storage,
    bus: Arc<ShardStateBus>,
    config: Arc<DaemonConfig>,
}

enum StageFailure {
    /// Transient failures outlasted the retry budget.
    Exhausted(DaemonError),
    Fatal(DaemonError),
}

enum StageReport {
    /// The range committed. `halt` is set when the commit was partial and
    /// the shard must stop afterwards.
    Committed {
        range: EventRange,
        halt: Option<DaemonError>,
    },
    Failed(StageFailure),
}

enum Outcome {
    Stopped,
    Errored(DaemonError),
    Exhausted(DaemonError),
}

enum Failure {
    Transient(String),
    Fatal(DaemonError),
}

impl ShardWorker {
    pub fn new(
        shard: ShardName,
        definition: Arc<ProjectionDefinition>,
        storage: Storage,
        bus: Arc<ShardStateBus>,
        config: Arc<DaemonConfig>,
    ) -> Self {
        Self {
            shard,
            definition,
            storage,
            bus,
            config,
        }
    }

    /// Start the worker task.
    pub fn spawn(self) -> ShardWorkerHandle {
        let (status_tx, status_rx) = watch::channel(WorkerStatus {
            status: ShardStatus::Starting,
            ..WorkerStatus::default()
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let shard = self.shard.clone();
        let task = tokio::spawn(self.run(status_tx, stop_rx));

        ShardWorkerHandle {
            shard,
            status: status_rx,
            stop: stop_tx,
            task,
        }
    }

    fn options(&self) -> AsyncOptions {
        self.definition
            .options()
            .cloned()
            .unwrap_or_else(|| self.config.options.clone())
    }

    fn announce(&self, action: ShardAction, sequence: i64) {
        self.bus
            .publish(ShardState::new(self.shard.identity(), sequence).with_action(action));
    }

    #[tracing::instrument(name = "shard.run", skip_all, fields(shard = %self.shard))]
    async fn run(self, status: watch::Sender<WorkerStatus>, mut stop: watch::Receiver<bool>) {
        let identity = self.shard.identity().to_string();
        info!(shard = %identity, "Shard worker starting");

        loop {
            let sequence = status.borrow().sequence;
            set_status(&status, ShardStatus::Starting, sequence, None);

            let outcome = match self.fetch_progress(&mut stop).await {
                Ok(Some(progress)) => {
                    self.announce(ShardAction::Started, progress);
                    set_status(&status, ShardStatus::Running, progress, None);
                    info!(shard = %identity, progress, "Shard worker running");
                    self.run_pipeline(progress, &status, &mut stop).await
                }
                Ok(None) => Outcome::Stopped,
                Err(e) => Outcome::Exhausted(e),
            };

            let sequence = status.borrow().sequence;
            match outcome {
                Outcome::Stopped => {
                    self.announce(ShardAction::Stopped, sequence);
                    set_status(&status, ShardStatus::Stopped, sequence, None);
                    info!(shard = %identity, sequence, "Shard worker stopped");
                    return;
                }
                Outcome::Errored(e) => {
                    error!(shard = %identity, sequence, error = %e, "Shard worker errored");
                    self.announce(ShardAction::Errored, sequence);
                    set_status(&status, ShardStatus::Errored, sequence, Some(e.to_string()));
                    return;
                }
                Outcome::Exhausted(e) => {
                    let pause = self.config.errors.pause();
                    warn!(shard = %identity, error = %e, pause = ?pause, "Shard worker pausing");
                    self.announce(ShardAction::Paused, sequence);
                    set_status(&status, ShardStatus::Paused, sequence, Some(e.to_string()));

                    if sleep_or_stop(pause, &mut stop).await {
                        self.announce(ShardAction::Stopped, sequence);
                        set_status(&status, ShardStatus::Stopped, sequence, None);
                        info!(shard = %identity, sequence, "Shard worker stopped while paused");
                        return;
                    }
                }
            }
        }
    }

    /// Stored progress, or `None` if stopped while fetching.
    async fn fetch_progress(&self, stop: &mut watch::Receiver<bool>) -> Result<Option<i64>> {
        let progress = self.storage.progress.clone();
        let identity = self.shard.identity().to_string();
        let fetch = (|| {
            let progress = progress.clone();
            let identity = identity.clone();
            async move { progress.fetch_progress(&identity).await }
        })
        .retry(self.config.retry.backoff())
        .when(|e: &StorageError| e.is_transient())
        .notify(|e: &StorageError, delay: Duration| {
            warn!(shard = %self.shard, error = %e, delay = ?delay, "Failed to fetch progress, retrying");
        });

        tokio::select! {
            biased;
            _ = wait_for_stop(stop) => Ok(None),
            result = fetch => result.map(Some).map_err(DaemonError::from),
        }
    }

    async fn run_pipeline(
        &self,
        progress: i64,
        status: &watch::Sender<WorkerStatus>,
        stop: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let options = self.options();
        let depth = queue_depth(&options);
        let mut scheduler = RangeScheduler::new(self.shard.clone(), &options);

        let (load_tx, load_rx) = mpsc::channel::<EventRange>(depth);
        let (apply_tx, apply_rx) = mpsc::channel::<EventRangeGroup>(depth);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<StageReport>();
        let (halt_tx, halt_rx) = watch::channel(false);

        let load_stage = LoadStage {
            shard: self.shard.clone(),
            loader: RangeLoader::new(self.storage.event_log.clone()),
            filter: self.definition.filter_for(&self.shard),
            retry: self.config.retry.clone(),
        };
        let apply_stage = ApplyStage {
            shard: self.shard.clone(),
            definition: self.definition.clone(),
            storage: self.storage.clone(),
            errors: self.config.errors.clone(),
            retry: self.config.retry.clone(),
        };
        let load_task = tokio::spawn(load_stage.run(load_rx, apply_tx, done_tx.clone(), halt_rx.clone()));
        let apply_task = tokio::spawn(apply_stage.run(apply_rx, done_tx, halt_rx));

        let mut high_water = self.bus.watch_high_water();
        let mut high_water_open = true;
        let start = *high_water.borrow_and_update();
        let mut backlog: VecDeque<EventRange> = scheduler.start(start, progress).into();

        let outcome = loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break Outcome::Stopped;
                    }
                }
                report = done_rx.recv() => match report {
                    Some(StageReport::Committed { range, halt }) => {
                        self.record_commit(&range, status);
                        if let Some(e) = halt {
                            break Outcome::Errored(e);
                        }
                        backlog.extend(scheduler.event_range_updated(&range));
                    }
                    Some(StageReport::Failed(StageFailure::Exhausted(e))) => break Outcome::Exhausted(e),
                    Some(StageReport::Failed(StageFailure::Fatal(e))) => break Outcome::Errored(e),
                    None => break Outcome::Errored(DaemonError::StageExited(self.shard.identity().to_string())),
                },
                changed = high_water.changed(), if high_water_open => {
                    if changed.is_ok() {
                        let mark = *high_water.borrow_and_update();
                        backlog.extend(scheduler.mark_high_water(mark));
                    } else {
                        high_water_open = false;
                    }
                }
                permit = load_tx.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(range) = backlog.pop_front() {
                            permit.send(range);
                        }
                    }
                    Err(_) => break Outcome::Errored(DaemonError::StageExited(self.shard.identity().to_string())),
                },
            }
        };

        // Stages finish any commit already under way before exiting.
        let _ = halt_tx.send(true);
        drop(load_tx);
        for (stage, task) in [("load", load_task), ("apply", apply_task)] {
            if let Err(e) = task.await {
                error!(shard = %self.shard, stage, error = %e, "Pipeline stage panicked");
            }
        }
        while let Ok(report) = done_rx.try_recv() {
            if let StageReport::Committed { range, .. } = report {
                self.record_commit(&range, status);
            }
        }

        outcome
    }

    fn record_commit(&self, range: &EventRange, status: &watch::Sender<WorkerStatus>) {
        let sequence = range.commit_ceiling();
        status.send_modify(|s| s.sequence = sequence);
        self.announce(ShardAction::Updated, sequence);
        debug!(shard = %self.shard, floor = range.floor, sequence, "Range committed");
    }
}

fn set_status(
    status: &watch::Sender<WorkerStatus>,
    state: ShardStatus,
    sequence: i64,
    error: Option<String>,
) {
    status.send_replace(WorkerStatus {
        status: state,
        sequence,
        error,
    });
}

/// Room for every range the hopper can hold, plus one.
fn queue_depth(options: &AsyncOptions) -> usize {
    let batch = options.batch_size.max(1);
    let ranges = (options.maximum_hopper_size + batch - 1) / batch;
    ranges.max(1) as usize + 1
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`. Returns true if stopped first.
async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = wait_for_stop(stop) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn next_or_halt<T>(rx: &mut mpsc::Receiver<T>, halt: &mut watch::Receiver<bool>) -> Option<T> {
    tokio::select! {
        biased;
        _ = wait_for_stop(halt) => None,
        item = rx.recv() => item,
    }
}

// ============================================================================
// Load Stage
// ============================================================================

struct LoadStage {
    shard: ShardName,
    loader: RangeLoader,
    filter: EventFilter,
    retry: RetryConfig,
}

impl LoadStage {
    async fn run(
        self,
        mut ranges: mpsc::Receiver<EventRange>,
        loaded: mpsc::Sender<EventRangeGroup>,
        done: mpsc::UnboundedSender<StageReport>,
        mut halt: watch::Receiver<bool>,
    ) {
        while let Some(range) = next_or_halt(&mut ranges, &mut halt).await {
            let mut group = EventRangeGroup::new(range);
            let mut budget = RetryBudget::new(self.retry.backoff());

            loop {
                group.reset();
                match self.loader.load(group.range_mut(), &self.filter).await {
                    Ok(()) => break,
                    Err(e) if e.is_transient() => {
                        group.abort(&e);
                        let Some(delay) = budget.next_delay() else {
                            let _ = done.send(StageReport::Failed(StageFailure::Exhausted(
                                DaemonError::RetriesExhausted {
                                    shard: self.shard.identity().to_string(),
                                    attempts: budget.attempts() + 1,
                                    last_error: e.to_string(),
                                },
                            )));
                            return;
                        };
                        warn!(
                            shard = %self.shard,
                            range = %group.range(),
                            attempt = group.attempts(),
                            error = %e,
                            delay = ?delay,
                            "Range load failed, retrying"
                        );
                        if sleep_or_stop(delay, &mut halt).await {
                            return;
                        }
                    }
                    Err(e) => {
                        group.abort(&e);
                        let _ = done.send(StageReport::Failed(StageFailure::Fatal(e.into())));
                        return;
                    }
                }
            }

            if loaded.send(group).await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Apply Stage
// ============================================================================

struct ApplyStage {
    shard: ShardName,
    definition: Arc<ProjectionDefinition>,
    storage: Storage,
    errors: ErrorHandlingConfig,
    retry: RetryConfig,
}

impl ApplyStage {
    async fn run(
        self,
        mut groups: mpsc::Receiver<EventRangeGroup>,
        done: mpsc::UnboundedSender<StageReport>,
        mut halt: watch::Receiver<bool>,
    ) {
        while let Some(group) = next_or_halt(&mut groups, &mut halt).await {
            let Some(report) = self.process(group, &mut halt).await else {
                return;
            };
            let keep_going = matches!(report, StageReport::Committed { halt: None, .. });
            if done.send(report).is_err() || !keep_going {
                return;
            }
        }
    }

    /// Apply and commit one range, retrying transient failures.
    ///
    /// Returns `None` when halted before the commit step.
    async fn process(
        &self,
        mut group: EventRangeGroup,
        halt: &mut watch::Receiver<bool>,
    ) -> Option<StageReport> {
        let mut stop_error = self.screen_poison(group.range_mut());
        let mut budget = RetryBudget::new(self.retry.backoff());

        loop {
            group.reset();
            let result = match self.prepare(group.range_mut(), &mut stop_error).await {
                Ok(commit) => {
                    if *halt.borrow() {
                        group.abort("shard stopping");
                        debug!(shard = %self.shard, range = %group.range(), "Range abandoned before commit");
                        return None;
                    }
                    self.commit(commit).await
                }
                Err(failure) => Err(failure),
            };

            match result {
                Ok(()) => {
                    return Some(StageReport::Committed {
                        range: group.into_range(),
                        halt: stop_error,
                    })
                }
                Err(Failure::Fatal(e)) => {
                    group.abort(&e);
                    return Some(StageReport::Failed(StageFailure::Fatal(e)));
                }
                Err(Failure::Transient(message)) => {
                    group.abort(&message);
                    let Some(delay) = budget.next_delay() else {
                        return Some(StageReport::Failed(StageFailure::Exhausted(
                            DaemonError::RetriesExhausted {
                                shard: self.shard.identity().to_string(),
                                attempts: budget.attempts() + 1,
                                last_error: message,
                            },
                        )));
                    };
                    warn!(
                        shard = %self.shard,
                        range = %group.range(),
                        attempt = group.attempts(),
                        error = %message,
                        delay = ?delay,
                        "Range apply failed, retrying"
                    );
                    if sleep_or_stop(delay, halt).await {
                        return None;
                    }
                }
            }
        }
    }

    /// With poison skipping disabled, cut the range at the first poison
    /// event so only the clean prefix commits.
    fn screen_poison(&self, range: &mut EventRange) -> Option<DaemonError> {
        if self.errors.skip_serialization_errors {
            return None;
        }
        let first = range.poison().first().cloned()?;
        range.skip_event_sequence(first.sequence);
        Some(DaemonError::PoisonEvent {
            shard: self.shard.identity().to_string(),
            sequence: first.sequence,
            reason: first.reason,
        })
    }

    /// Run the projection over a loaded range and build its commit.
    async fn prepare(
        &self,
        range: &mut EventRange,
        stop_error: &mut Option<DaemonError>,
    ) -> std::result::Result<ProgressCommit, Failure> {
        for poison in range.poison() {
            warn!(
                shard = %self.shard,
                sequence = poison.sequence,
                reason = %poison.reason,
                "Dead-lettering undecodable event"
            );
            self.dead_letter(DeadLetterEvent::poison(&self.shard, poison))
                .await?;
        }

        let mut session = ProjectionSession::new(self.storage.documents.as_ref());
        if let ProjectionHandler::Batched(projection) = self.definition.handler() {
            if let Err(e) = projection.apply_batch(range.events(), &mut session).await {
                return Err(self.batch_failure(e));
            }
        } else {
            let mut truncate_at = None;
            for event in range.events() {
                let mark = session.mark();
                if let Err(e) = self.apply_event(event, &mut session).await {
                    session.rollback_to(mark);
                    if let Some(halt) = self.handle_event_error(event, e).await? {
                        truncate_at = Some(event.sequence);
                        *stop_error = Some(halt);
                        break;
                    }
                }
            }
            if let Some(sequence) = truncate_at {
                range.skip_event_sequence(sequence);
            }
        }

        Ok(ProgressCommit {
            shard: self.shard.identity().to_string(),
            previous: range.floor,
            ceiling: range.commit_ceiling(),
            operations: session.into_operations(),
        })
    }

    async fn apply_event(
        &self,
        event: &Event,
        session: &mut ProjectionSession<'_>,
    ) -> std::result::Result<(), ProjectionError> {
        match self.definition.handler() {
            ProjectionHandler::Single(projection) => projection.apply(event, session),
            ProjectionHandler::Async(projection) => projection.apply(event, session).await,
            ProjectionHandler::Batched(projection) => {
                projection
                    .apply_batch(std::slice::from_ref(event), session)
                    .await
            }
        }
    }

    /// Decide what a failed event means for the range.
    ///
    /// `Ok(None)`: the event was skipped. `Ok(Some(e))`: commit the prefix
    /// before this event, then halt with `e`.
    async fn handle_event_error(
        &self,
        event: &Event,
        error: ProjectionError,
    ) -> std::result::Result<Option<DaemonError>, Failure> {
        match error {
            ProjectionError::Storage(e) if e.is_transient() => Err(Failure::Transient(e.to_string())),
            ProjectionError::Storage(e) => Err(Failure::Fatal(e.into())),
            ProjectionError::Deserialization { reason, .. } => {
                if !self.errors.skip_serialization_errors {
                    return Ok(Some(DaemonError::PoisonEvent {
                        shard: self.shard.identity().to_string(),
                        sequence: event.sequence,
                        reason,
                    }));
                }
                warn!(
                    shard = %self.shard,
                    sequence = event.sequence,
                    reason = %reason,
                    "Dead-lettering event the projection could not decode"
                );
                self.dead_letter(DeadLetterEvent::from_event(
                    &self.shard,
                    event,
                    DeadLetterReason::Deserialization,
                    &reason,
                ))
                .await?;
                Ok(None)
            }
            ProjectionError::Apply { message, .. } => match self.errors.apply_error_policy {
                ApplyErrorPolicy::Stop => Err(Failure::Fatal(DaemonError::ProjectionFailed {
                    shard: self.shard.identity().to_string(),
                    projection: self.shard.name().to_string(),
                    sequence: event.sequence,
                    message,
                })),
                ApplyErrorPolicy::SkipEvent => {
                    warn!(
                        shard = %self.shard,
                        sequence = event.sequence,
                        error = %message,
                        "Skipping event rejected by projection"
                    );
                    self.dead_letter(DeadLetterEvent::from_event(
                        &self.shard,
                        event,
                        DeadLetterReason::ApplyFailed,
                        &message,
                    ))
                    .await?;
                    Ok(None)
                }
            },
        }
    }

    fn batch_failure(&self, error: ProjectionError) -> Failure {
        match error {
            ProjectionError::Storage(e) if e.is_transient() => Failure::Transient(e.to_string()),
            ProjectionError::Storage(e) => Failure::Fatal(e.into()),
            ProjectionError::Apply { sequence, message }
            | ProjectionError::Deserialization {
                sequence,
                reason: message,
            } => Failure::Fatal(DaemonError::ProjectionFailed {
                shard: self.shard.identity().to_string(),
                projection: self.shard.name().to_string(),
                sequence,
                message,
            }),
        }
    }

    async fn dead_letter(&self, dead_letter: DeadLetterEvent) -> std::result::Result<(), Failure> {
        match self.storage.dead_letters.record(dead_letter).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(Failure::Transient(e.to_string())),
            Err(e) => Err(Failure::Fatal(e.into())),
        }
    }

    async fn commit(&self, commit: ProgressCommit) -> std::result::Result<(), Failure> {
        let ceiling = commit.ceiling;
        match self.storage.progress.commit(commit).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(Failure::Transient(e.to_string())),
            Err(e) => {
                error!(shard = %self.shard, ceiling, error = %e, "Progress commit rejected");
                Err(Failure::Fatal(e.into()))
            }
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owner's handle to a running worker.
///
/// Dropping the handle stops the worker.
pub struct ShardWorkerHandle {
    shard: ShardName,
    status: watch::Receiver<WorkerStatus>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ShardWorkerHandle {
    pub fn shard(&self) -> &ShardName {
        &self.shard
    }

    pub fn status(&self) -> ShardStatus {
        self.status.borrow().status
    }

    pub fn snapshot(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    /// Receiver for status changes.
    pub fn watch_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker to stop after any in-flight commit.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop and wait for the worker to exit. Returns its final status.
    pub async fn shutdown(self) -> WorkerStatus {
        self.stop();
        if let Err(e) = self.task.await {
            error!(shard = %self.shard, error = %e, "Shard worker task failed");
        }
        let status = self.status.borrow().clone();
        status
    }
}

#[cfg(test)]
mod tests;
