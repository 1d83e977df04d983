//! Shard identity and progress announcements.

use std::fmt;

/// Group that reads every tenant.
pub const ALL_GROUP: &str = "All";

/// Bus identity reserved for the log-wide high-water mark.
pub const HIGH_WATER_IDENTITY: &str = "All";

/// Stable identity of one projection shard.
///
/// The identity string is `name:group`, or `name:group:vN` once a
/// projection is versioned past 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardName {
    name: String,
    group: String,
    version: u32,
    identity: String,
}

impl ShardName {
    pub fn new(name: &str, group: &str, version: u32) -> Self {
        let version = version.max(1);
        let identity = if version > 1 {
            format!("{}:{}:v{}", name, group, version)
        } else {
            format!("{}:{}", name, group)
        };
        Self {
            name: name.to_string(),
            group: group.to_string(),
            version,
            identity,
        }
    }

    /// Shard of the `All` group at version 1.
    pub fn all(name: &str) -> Self {
        Self::new(name, ALL_GROUP, 1)
    }

    /// Parse an identity string produced by [`ShardName::identity`].
    pub fn parse(identity: &str) -> Option<Self> {
        let mut parts = identity.split(':');
        let name = parts.next().filter(|s| !s.is_empty())?;
        let group = parts.next().filter(|s| !s.is_empty())?;
        let version = match parts.next() {
            Some(v) => v.strip_prefix('v')?.parse().ok().filter(|v| *v > 1)?,
            None => 1,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(name, group, version))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Tenant this shard is restricted to, if any.
    pub fn tenant(&self) -> Option<&str> {
        if self.group == ALL_GROUP {
            None
        } else {
            Some(&self.group)
        }
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// What a shard state announces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShardAction {
    /// The shard (re)started from the given sequence.
    Started,
    /// Progress advanced.
    #[default]
    Updated,
    Paused,
    Stopped,
    Errored,
}

/// A progress announcement on the [`ShardStateBus`](super::ShardStateBus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardState {
    pub identity: String,
    pub sequence: i64,
    pub action: ShardAction,
}

impl ShardState {
    pub fn new(identity: impl Into<String>, sequence: i64) -> Self {
        Self {
            identity: identity.into(),
            sequence,
            action: ShardAction::default(),
        }
    }

    pub fn with_action(mut self, action: ShardAction) -> Self {
        self.action = action;
        self
    }

    /// Announcement of a new log-wide high-water mark.
    pub fn high_water(sequence: i64) -> Self {
        Self::new(HIGH_WATER_IDENTITY, sequence)
    }
}

/// Lifecycle of a shard worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShardStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Backing off after exhausting retries; restarts by itself.
    Paused,
    /// Halted on an unrecoverable failure until restarted or rebuilt.
    Errored,
}

impl ShardStatus {
    /// Whether a worker in this state still owns the shard.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ShardStatus::Starting | ShardStatus::Running | ShardStatus::Paused
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_omits_first_version() {
        assert_eq!(ShardName::all("orders").identity(), "orders:All");
        assert_eq!(ShardName::new("orders", "All", 3).identity(), "orders:All:v3");
    }

    #[test]
    fn test_parse_round_trips_identity() {
        let shard = ShardName::parse("orders:acme:v2").unwrap();
        assert_eq!(shard.name(), "orders");
        assert_eq!(shard.group(), "acme");
        assert_eq!(shard.version(), 2);
        assert_eq!(shard.tenant(), Some("acme"));

        assert_eq!(ShardName::parse("orders:All"), Some(ShardName::all("orders")));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ShardName::parse("orders").is_none());
        assert!(ShardName::parse("orders:All:2").is_none());
        assert!(ShardName::parse("orders:All:v1").is_none());
        assert!(ShardName::parse(":All").is_none());
        assert!(ShardName::parse("a:b:v2:c").is_none());
    }

    #[test]
    fn test_default_action_is_updated() {
        assert_eq!(ShardState::new("orders:All", 5).action, ShardAction::Updated);
        assert_eq!(ShardState::high_water(9).identity, HIGH_WATER_IDENTITY);
    }
}
