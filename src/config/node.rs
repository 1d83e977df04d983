//! Node coordination configuration.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Default name of the cluster-wide daemon lease.
pub const DEFAULT_LOCK_NAME: &str = "waymark-daemon";

/// Whether and how this node runs the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonMode {
    /// Never start the daemon on this node.
    Disabled,
    /// Always run the daemon; single-instance deployments.
    #[default]
    Solo,
    /// Run the daemon only while holding the cluster lease.
    HotCold,
}

/// Node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub mode: DaemonMode,

    /// Lease holder identity. Must be unique per node.
    ///
    /// Default: random UUID.
    pub node_id: String,

    /// Lease name shared by all candidate nodes.
    pub lock_name: String,

    /// Lease lifetime without renewal.
    ///
    /// Default: 15,000 ms.
    pub lease_ttl_ms: u64,

    /// Leader renewal period. Must be shorter than the TTL.
    ///
    /// Default: 3,000 ms.
    pub renew_interval_ms: u64,

    /// Follower poll period for a vacant lease.
    ///
    /// Default: 2,000 ms.
    pub acquire_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: DaemonMode::Solo,
            node_id: uuid::Uuid::new_v4().to_string(),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lease_ttl_ms: 15_000,
            renew_interval_ms: 3_000,
            acquire_interval_ms: 2_000,
        }
    }
}

impl NodeConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != DaemonMode::HotCold {
            return Ok(());
        }
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node.node_id must not be empty".to_string()));
        }
        if self.renew_interval_ms == 0 || self.acquire_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "node lease intervals must be positive".to_string(),
            ));
        }
        if self.renew_interval_ms >= self.lease_ttl_ms {
            return Err(ConfigError::Invalid(format!(
                "node.renew_interval_ms ({}) must be below node.lease_ttl_ms ({})",
                self.renew_interval_ms, self.lease_ttl_ms
            )));
        }
        Ok(())
    }
}
