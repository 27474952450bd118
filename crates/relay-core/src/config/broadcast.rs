//! Cross-node broadcast bus configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the shared notification channel and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Name of the shared pub/sub channel.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Interval of the watermark reconciliation pass, in milliseconds.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,
    /// First reconnect delay after a bus failure, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub reconnect_initial_backoff_ms: u64,
    /// Reconnect delay ceiling, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub reconnect_max_backoff_ms: u64,
    /// Capacity of the outgoing notification buffer.
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,
    /// Bus silence from a live peer before a partition is suspected, in milliseconds.
    #[serde(default = "default_partition_threshold")]
    pub partition_threshold_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            reconcile_interval_ms: default_reconcile_interval(),
            reconnect_initial_backoff_ms: default_initial_backoff(),
            reconnect_max_backoff_ms: default_max_backoff(),
            publish_buffer: default_publish_buffer(),
            partition_threshold_ms: default_partition_threshold(),
        }
    }
}

impl BroadcastConfig {
    /// Reconciliation interval.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Initial reconnect backoff.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    /// Maximum reconnect backoff.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms)
    }

    /// Partition suspicion threshold.
    pub fn partition_threshold(&self) -> Duration {
        Duration::from_millis(self.partition_threshold_ms)
    }
}

/// Channel names are interpolated into `LISTEN`, so only identifier characters pass.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_channel_name() -> String {
    "relay_outbox".to_string()
}

fn default_reconcile_interval() -> u64 {
    2_000
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_publish_buffer() -> usize {
    1_024
}

fn default_partition_threshold() -> u64 {
    30_000
}
