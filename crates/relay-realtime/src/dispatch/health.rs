//! Degraded-mode flags shared by the dispatcher and reconciler.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use relay_core::error::AppError;
use relay_core::types::NodeId;

/// Degradation state of one node.
#[derive(Debug, Default)]
pub struct NodeHealth {
    store_unavailable: AtomicBool,
    retention_gap: AtomicBool,
    suspected_partitions: Mutex<BTreeSet<NodeId>>,
}

impl NodeHealth {
    /// Healthy state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter degraded mode after a failed outbox write.
    pub fn mark_store_unavailable(&self, cause: &AppError) {
        if !self.store_unavailable.swap(true, Ordering::SeqCst) {
            warn!(error = %cause, "Outbox store unavailable, rejecting publishes until it recovers");
        }
    }

    /// Leave degraded mode.
    pub fn mark_store_recovered(&self) {
        if self.store_unavailable.swap(false, Ordering::SeqCst) {
            info!("Outbox store reachable again, accepting publishes");
        }
    }

    /// Whether publishes are currently rejected.
    pub fn store_unavailable(&self) -> bool {
        self.store_unavailable.load(Ordering::SeqCst)
    }

    /// Record that sequences `from..=to` of `topic` were evicted before this
    /// node replayed them.
    pub fn report_retention_gap(&self, topic: &str, from: u64, to: u64) {
        self.retention_gap.store(true, Ordering::SeqCst);
        error!(
            topic = %topic,
            from_sequence = from,
            to_sequence = to,
            missing = to.saturating_sub(from) + 1,
            "Sequences evicted before catch-up; subscribers miss these messages"
        );
    }

    /// Whether any retention gap was observed.
    pub fn retention_gap(&self) -> bool {
        self.retention_gap.load(Ordering::SeqCst)
    }

    /// Replace the set of peers suspected to be partitioned away.
    pub fn set_suspected_partitions(&self, peers: BTreeSet<NodeId>) {
        let mut current = self
            .suspected_partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for peer in peers.difference(&current) {
            warn!(peer = %peer, "Peer is live in the outbox but silent on the broadcast bus; suspected partition");
        }
        for peer in current.difference(&peers) {
            info!(peer = %peer, "Peer heard on the broadcast bus again");
        }
        *current = peers;
    }

    /// Peers currently suspected to be partitioned.
    pub fn suspected_partitions(&self) -> Vec<NodeId> {
        self.suspected_partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Snapshot for status reporting.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            store_unavailable: self.store_unavailable(),
            retention_gap: self.retention_gap(),
            suspected_partitions: self.suspected_partitions(),
        }
    }
}

/// Serializable view of [`NodeHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Publishes are rejected.
    pub store_unavailable: bool,
    /// Some sequences could not be replayed.
    pub retention_gap: bool,
    /// Peers suspected to be partitioned away.
    pub suspected_partitions: Vec<NodeId>,
}
