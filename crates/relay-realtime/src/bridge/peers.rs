//! Last-heard times of peer nodes on the broadcast bus.

use std::collections::BTreeSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use relay_core::types::{NodeId, NodeMembership};

/// Tracks when each peer was last heard on the bus.
#[derive(Debug)]
pub struct PeerTracker {
    node_id: NodeId,
    started: Instant,
    last_heard: DashMap<NodeId, Instant>,
}

impl PeerTracker {
    /// Tracker for the node `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            started: Instant::now(),
            last_heard: DashMap::new(),
        }
    }

    /// Record traffic from `peer`. Own traffic is ignored.
    pub fn heard(&self, peer: &NodeId) {
        if *peer != self.node_id {
            self.last_heard.insert(peer.clone(), Instant::now());
        }
    }

    /// Peers that are live in the membership table but have been silent
    /// on the bus for longer than `threshold`.
    pub fn suspected(&self, live: &[NodeMembership], threshold: Duration) -> BTreeSet<NodeId> {
        if self.started.elapsed() < threshold {
            return BTreeSet::new();
        }
        live.iter()
            .map(|m| &m.node_id)
            .filter(|peer| **peer != self.node_id)
            .filter(|peer| {
                self.last_heard
                    .get(*peer)
                    .is_none_or(|at| at.elapsed() > threshold)
            })
            .cloned()
            .collect()
    }

    /// Number of peers ever heard.
    pub fn known_peers(&self) -> usize {
        self.last_heard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn member(id: &str) -> NodeMembership {
        NodeMembership {
            node_id: NodeId::new(id),
            channel_name: "relay_outbox".to_string(),
            last_seen: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_live_peer_is_suspected() {
        let tracker = PeerTracker::new(NodeId::new("a"));
        let live = vec![member("a"), member("b"), member("c")];
        let threshold = Duration::from_secs(30);

        assert!(tracker.suspected(&live, threshold).is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        tracker.heard(&NodeId::new("b"));
        tracker.heard(&NodeId::new("a"));
        let suspected = tracker.suspected(&live, threshold);
        assert_eq!(suspected, [NodeId::new("c")].into());
        assert_eq!(tracker.known_peers(), 1);
    }
}
