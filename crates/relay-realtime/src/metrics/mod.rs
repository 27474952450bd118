//! Relay engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level metrics counters.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions opened since start
    pub sessions_opened: AtomicU64,
    /// Sessions closed since start
    pub sessions_closed: AtomicU64,
    /// Sessions currently open
    pub sessions_active: AtomicU64,
    /// Inbound frames processed
    pub frames_received: AtomicU64,
    /// Messages accepted into the outbox by this node
    pub messages_published: AtomicU64,
    /// Publishes rejected because the outbox was unreachable
    pub publish_failures: AtomicU64,
    /// Message frames enqueued for local sessions
    pub messages_delivered: AtomicU64,
    /// Message frames discarded by drop-oldest overflow
    pub messages_dropped: AtomicU64,
    /// Messages delivered through outbox catch-up
    pub messages_replayed: AtomicU64,
    /// Deliveries suppressed by per-session sequence dedup
    pub duplicates_suppressed: AtomicU64,
    /// Broadcast notifications received from peers
    pub notifications_received: AtomicU64,
    /// Own notifications ignored on receipt
    pub echoes_ignored: AtomicU64,
    /// Sequences that could not be replayed because they were evicted
    pub retention_gaps: AtomicU64,
    /// Sequences a resuming client asked for that were no longer retained
    pub resume_gaps: AtomicU64,
    /// Sessions disconnected for overflowing their queue
    pub slow_consumer_disconnects: AtomicU64,
    /// Sessions closed for missing heartbeats
    pub heartbeat_timeouts: AtomicU64,
    /// Sessions closed for protocol violations
    pub protocol_violations: AtomicU64,
    /// Broadcast bus reconnections observed
    pub bus_reconnects: AtomicU64,
}

impl RelayMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session opening
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closing
    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Add `count` to a counter
    pub fn add(counter: &AtomicU64, count: u64) {
        counter.fetch_add(count, Ordering::Relaxed);
    }

    /// Increment a counter
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_replayed: self.messages_replayed.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            echoes_ignored: self.echoes_ignored.load(Ordering::Relaxed),
            retention_gaps: self.retention_gaps.load(Ordering::Relaxed),
            resume_gaps: self.resume_gaps.load(Ordering::Relaxed),
            slow_consumer_disconnects: self.slow_consumer_disconnects.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            bus_reconnects: self.bus_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions opened since start
    pub sessions_opened: u64,
    /// Sessions closed since start
    pub sessions_closed: u64,
    /// Sessions currently open
    pub sessions_active: u64,
    /// Inbound frames processed
    pub frames_received: u64,
    /// Messages accepted into the outbox by this node
    pub messages_published: u64,
    /// Publishes rejected while degraded
    pub publish_failures: u64,
    /// Message frames enqueued for local sessions
    pub messages_delivered: u64,
    /// Message frames discarded by drop-oldest overflow
    pub messages_dropped: u64,
    /// Messages delivered through catch-up
    pub messages_replayed: u64,
    /// Duplicate deliveries suppressed
    pub duplicates_suppressed: u64,
    /// Peer notifications received
    pub notifications_received: u64,
    /// Own notifications ignored
    pub echoes_ignored: u64,
    /// Unrecoverable sequences reported
    pub retention_gaps: u64,
    /// Expired resume ranges reported to clients
    pub resume_gaps: u64,
    /// Slow-consumer disconnects
    pub slow_consumer_disconnects: u64,
    /// Heartbeat timeouts
    pub heartbeat_timeouts: u64,
    /// Protocol violations
    pub protocol_violations: u64,
    /// Bus reconnects
    pub bus_reconnects: u64,
}
