//! Distributed lease interface.

use std::time::Duration;

use async_trait::async_trait;

use super::event_log::Result;

/// Cluster-wide mutual exclusion with expiry.
///
/// A lease is held by at most one holder at a time. It lapses on its own
/// when the holder stops renewing, so a crashed node cannot keep it.
///
/// Implementations:
/// - `InMemoryLease`: single-process lease table for tests
/// - `SqlLease`: row in the `daemon_leases` table
#[async_trait]
pub trait DistributedLease: Send + Sync {
    /// Take the lease if it is free, expired, or already ours.
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Extend a lease we hold. Returns false if someone else holds it.
    async fn renew(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease up early. No-op if we do not hold it.
    async fn release(&self, name: &str, holder: &str) -> Result<()>;
}
