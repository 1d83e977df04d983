//! In-process fan-out of shard progress.
//!
//! Every subscriber gets its own bounded channel. Publishing never blocks:
//! a subscriber whose buffer is full misses that message, and a dropped
//! subscriber is pruned on the next publish. The latest high-water mark is
//! also kept in a `watch` channel so shard workers always see the newest
//! value even if they fall behind on announcements.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::error::{DaemonError, Result};
use super::shard::{ShardAction, ShardState, HIGH_WATER_IDENTITY};

/// Default per-subscriber buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

struct Waiter {
    identity: String,
    minimum: i64,
    sender: oneshot::Sender<ShardState>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<mpsc::Sender<ShardState>>,
    latest: HashMap<String, i64>,
    waiters: Vec<Waiter>,
    completed: bool,
}

/// Publish/subscribe registry for [`ShardState`] announcements.
pub struct ShardStateBus {
    inner: Mutex<BusInner>,
    high_water: watch::Sender<i64>,
    buffer: usize,
}

impl Default for ShardStateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardStateBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (high_water, _) = watch::channel(0);
        Self {
            inner: Mutex::new(BusInner::default()),
            high_water,
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a subscriber. Delivery order follows registration order.
    pub fn subscribe(&self) -> mpsc::Receiver<ShardState> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.lock();
        if !inner.completed {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// Deliver a state to every subscriber and resolve satisfied waits.
    ///
    /// `Started` re-baselines the identity; any other action keeps the
    /// highest sequence seen, so subscribers never observe a regression.
    pub fn publish(&self, state: ShardState) {
        let mut inner = self.lock();
        if inner.completed {
            debug!(identity = %state.identity, "Publish after bus completed, dropping");
            return;
        }

        let current = inner.latest.get(&state.identity).copied();
        let state = match (state.action, current) {
            (ShardAction::Started, _) | (_, None) => state,
            (ShardAction::Updated, Some(seq)) if state.sequence < seq => {
                debug!(
                    identity = %state.identity,
                    sequence = state.sequence,
                    latest = seq,
                    "Dropping regressing shard state"
                );
                return;
            }
            (_, Some(seq)) => ShardState {
                sequence: state.sequence.max(seq),
                ..state
            },
        };
        inner.latest.insert(state.identity.clone(), state.sequence);

        if state.identity == HIGH_WATER_IDENTITY {
            let mark = state.sequence;
            self.high_water.send_if_modified(|current| {
                if mark > *current {
                    *current = mark;
                    true
                } else {
                    false
                }
            });
        }

        let waiters = std::mem::take(&mut inner.waiters);
        for waiter in waiters {
            if waiter.sender.is_closed() {
                continue;
            }
            if waiter.identity == state.identity && state.sequence >= waiter.minimum {
                let _ = waiter.sender.send(state.clone());
            } else {
                inner.waiters.push(waiter);
            }
        }

        inner.subscribers.retain(|subscriber| match subscriber.try_send(state.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(identity = %state.identity, "Shard state subscriber lagging, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Latest sequence published for an identity.
    pub fn latest(&self, identity: &str) -> Option<i64> {
        self.lock().latest.get(identity).copied()
    }

    /// Current high-water mark, 0 before the first publish.
    pub fn high_water(&self) -> i64 {
        *self.high_water.borrow()
    }

    /// Receiver that always holds the newest high-water mark.
    pub fn watch_high_water(&self) -> watch::Receiver<i64> {
        self.high_water.subscribe()
    }

    /// Wait until `identity` reaches `minimum`, or fail after `timeout`.
    ///
    /// Resolves immediately when the target was already observed.
    pub async fn wait_for_shard_state(
        &self,
        identity: &str,
        minimum: i64,
        timeout: Duration,
    ) -> Result<ShardState> {
        let receiver = {
            let mut inner = self.lock();
            if let Some(sequence) = inner.latest.get(identity).copied() {
                if sequence >= minimum {
                    return Ok(ShardState::new(identity, sequence));
                }
            }
            if inner.completed {
                return Err(DaemonError::BusCompleted);
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.push(Waiter {
                identity: identity.to_string(),
                minimum,
                sender,
            });
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(DaemonError::BusCompleted),
            Err(_) => Err(DaemonError::Timeout {
                identity: identity.to_string(),
                sequence: minimum,
                timeout,
            }),
        }
    }

    /// Wait until the high-water mark reaches `minimum`.
    pub async fn wait_for_high_water_mark(
        &self,
        minimum: i64,
        timeout: Duration,
    ) -> Result<ShardState> {
        self.wait_for_shard_state(HIGH_WATER_IDENTITY, minimum, timeout)
            .await
    }

    /// Forget an identity's latest state so it can be re-baselined.
    pub fn reset(&self, identity: &str) {
        self.lock().latest.remove(identity);
    }

    /// Terminate all subscriptions and pending waits.
    pub fn complete(&self) {
        let mut inner = self.lock();
        inner.completed = true;
        inner.subscribers.clear();
        inner.waiters.clear();
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }
}
