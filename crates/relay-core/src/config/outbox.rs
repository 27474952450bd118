//! Durable outbox configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which outbox implementation backs the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxBackend {
    /// PostgreSQL tables plus LISTEN/NOTIFY.
    Postgres,
    /// In-process store; single node only.
    Memory,
}

/// Outbox retention and replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Storage backend.
    #[serde(default = "default_backend")]
    pub backend: OutboxBackend,
    /// Minimum age before a record may be evicted, in seconds.
    #[serde(default = "default_retention")]
    pub retention_seconds: u64,
    /// How often the eviction pass runs, in seconds.
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_seconds: u64,
    /// Maximum records read per replay query.
    #[serde(default = "default_replay_batch")]
    pub replay_batch_size: usize,
    /// A node not seen for this long no longer holds back eviction, in seconds.
    #[serde(default = "default_node_liveness")]
    pub node_liveness_seconds: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            retention_seconds: default_retention(),
            eviction_interval_seconds: default_eviction_interval(),
            replay_batch_size: default_replay_batch(),
            node_liveness_seconds: default_node_liveness(),
        }
    }
}

impl OutboxConfig {
    /// Retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    /// Eviction pass interval.
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_seconds)
    }

    /// Node liveness window.
    pub fn node_liveness(&self) -> Duration {
        Duration::from_secs(self.node_liveness_seconds)
    }
}

fn default_backend() -> OutboxBackend {
    OutboxBackend::Postgres
}

fn default_retention() -> u64 {
    3_600
}

fn default_eviction_interval() -> u64 {
    60
}

fn default_replay_batch() -> usize {
    500
}

fn default_node_liveness() -> u64 {
    120
}
