//! Session, queue and heartbeat configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a session's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to admit the new one.
    DropOldest,
    /// Close the slow session.
    Disconnect,
}

/// Real-time (WebSocket) engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Capacity of each session's outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Policy applied when the outbound queue is full.
    #[serde(default = "default_overflow_policy")]
    pub overflow_policy: OverflowPolicy,
    /// Interval between server pings / liveness sweeps, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Silence after which a session is closed, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    /// Maximum topic subscriptions per session.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_session: usize,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Upper bound on flushing queues during shutdown, in milliseconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: default_overflow_policy(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            max_subscriptions_per_session: default_max_subscriptions(),
            max_frame_bytes: default_max_frame_bytes(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl RealtimeConfig {
    /// Heartbeat sweep interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat expiry.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Shutdown drain bound.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}

fn default_heartbeat_interval() -> u64 {
    15_000
}

fn default_heartbeat_timeout() -> u64 {
    45_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_frame_bytes() -> usize {
    65_536
}

fn default_drain_timeout() -> u64 {
    5_000
}
