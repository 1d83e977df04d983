//! DistributedLease interface tests.

use std::time::Duration;

use waymark::storage::DistributedLease;

use super::unique;

const TTL: Duration = Duration::from_secs(30);

pub async fn test_lease_is_exclusive<L: DistributedLease>(lease: &L) {
    let name = unique("lease_exclusive");

    assert!(lease.try_acquire(&name, "node-a", TTL).await.unwrap());
    assert!(!lease.try_acquire(&name, "node-b", TTL).await.unwrap());
    // Re-acquiring our own lease extends it.
    assert!(lease.try_acquire(&name, "node-a", TTL).await.unwrap());
}

pub async fn test_renew_requires_holder<L: DistributedLease>(lease: &L) {
    let name = unique("lease_renew");

    assert!(lease.try_acquire(&name, "node-a", TTL).await.unwrap());
    assert!(lease.renew(&name, "node-a", TTL).await.unwrap());
    assert!(!lease.renew(&name, "node-b", TTL).await.unwrap());
}

pub async fn test_release_frees_lease<L: DistributedLease>(lease: &L) {
    let name = unique("lease_release");

    assert!(lease.try_acquire(&name, "node-a", TTL).await.unwrap());
    // Releasing someone else's lease does nothing.
    lease.release(&name, "node-b").await.unwrap();
    assert!(!lease.try_acquire(&name, "node-b", TTL).await.unwrap());

    lease.release(&name, "node-a").await.unwrap();
    assert!(lease.try_acquire(&name, "node-b", TTL).await.unwrap());
    assert!(!lease.renew(&name, "node-a", TTL).await.unwrap());
}

pub async fn test_expired_lease_can_be_taken<L: DistributedLease>(lease: &L) {
    let name = unique("lease_expiry");

    assert!(lease
        .try_acquire(&name, "node-a", Duration::from_millis(50))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(lease.try_acquire(&name, "node-b", TTL).await.unwrap());
    assert!(!lease.renew(&name, "node-a", TTL).await.unwrap());
}

#[macro_export]
macro_rules! run_lease_tests {
    ($lease:expr) => {{
        use $crate::storage::lease_tests::*;

        test_lease_is_exclusive($lease).await;
        println!("  test_lease_is_exclusive: PASSED");

        test_renew_requires_holder($lease).await;
        println!("  test_renew_requires_holder: PASSED");

        test_release_frees_lease($lease).await;
        println!("  test_release_frees_lease: PASSED");

        test_expired_lease_can_be_taken($lease).await;
        println!("  test_expired_lease_can_be_taken: PASSED");
    }};
}
