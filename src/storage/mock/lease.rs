//! In-memory DistributedLease implementation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::storage::{DistributedLease, Result, StorageError};

/// Lease table shared by every node in one process.
///
/// Expiry uses tokio's clock so paused-time tests can step through TTLs.
#[derive(Default)]
pub struct InMemoryLease {
    leases: RwLock<HashMap<String, (String, Instant)>>,
    unreachable: RwLock<HashSet<String>>,
}

impl InMemoryLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call from `holder` fail, as if its connection dropped.
    pub async fn set_unreachable(&self, holder: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(holder.to_string());
        } else {
            set.remove(holder);
        }
    }

    /// Current unexpired holder of a lease.
    pub async fn holder(&self, name: &str) -> Option<String> {
        self.leases
            .read()
            .await
            .get(name)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(holder, _)| holder.clone())
    }

    async fn check_reachable(&self, holder: &str) -> Result<()> {
        if self.unreachable.read().await.contains(holder) {
            return Err(StorageError::Unavailable(format!(
                "lease store unreachable from {}",
                holder
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedLease for InMemoryLease {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.check_reachable(holder).await?;
        let now = Instant::now();
        let mut leases = self.leases.write().await;
        match leases.get(name) {
            Some((current, expires_at)) if current != holder && *expires_at > now => Ok(false),
            _ => {
                leases.insert(name.to_string(), (holder.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.check_reachable(holder).await?;
        let mut leases = self.leases.write().await;
        match leases.get_mut(name) {
            Some((current, expires_at)) if current == holder => {
                *expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<()> {
        self.check_reachable(holder).await?;
        let mut leases = self.leases.write().await;
        if matches!(leases.get(name), Some((current, _)) if current == holder) {
            leases.remove(name);
        }
        Ok(())
    }
}
