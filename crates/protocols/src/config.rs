//! Tunables for the swarm protocols.

use core::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;

/// Limits and timeouts shared by every protocol.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SwarmConfig {
    /// Connections a peer pool keeps alive at once.
    pub max_concurrent_peers: usize,

    /// Pause after a failed dial or an exhausted provider lookup.
    #[serde(rename = "dial_backoff_ms", with = "serde_duration")]
    pub dial_backoff: Duration,

    /// Dispatches per object before its last error becomes final.
    pub max_job_attempts: usize,

    /// Replicators asked in parallel by one replication request.
    pub replication_fanout: usize,

    /// How long to look for replicators.
    #[serde(rename = "discovery_timeout_ms", with = "serde_duration")]
    pub discovery_timeout: Duration,

    /// Longest wait for a single response frame.
    #[serde(rename = "request_timeout_ms", with = "serde_duration")]
    pub request_timeout: Duration,

    /// Longest silence between two progress updates from a replicator.
    #[serde(rename = "replication_idle_timeout_ms", with = "serde_duration")]
    pub replication_idle_timeout: Duration,
}

impl SwarmConfig {
    /// Replaces the dial backoff.
    #[must_use]
    pub const fn with_dial_backoff(mut self, dial_backoff: Duration) -> Self {
        self.dial_backoff = dial_backoff;
        self
    }

    /// Replaces the pool size.
    #[must_use]
    pub const fn with_max_concurrent_peers(mut self, max_concurrent_peers: usize) -> Self {
        self.max_concurrent_peers = max_concurrent_peers;
        self
    }

    /// Replaces the per-object attempt limit.
    #[must_use]
    pub const fn with_max_job_attempts(mut self, max_job_attempts: usize) -> Self {
        self.max_job_attempts = max_job_attempts;
        self
    }

    /// Replaces the replicator discovery timeout.
    #[must_use]
    pub const fn with_discovery_timeout(mut self, discovery_timeout: Duration) -> Self {
        self.discovery_timeout = discovery_timeout;
        self
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_peers: 10,
            dial_backoff: Duration::from_secs(1),
            max_job_attempts: 3,
            replication_fanout: 8,
            discovery_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            replication_idle_timeout: Duration::from_secs(300),
        }
    }
}

mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
