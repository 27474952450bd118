//! Top-level relay node that ties together all subsystems.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::config::AppConfig;
use relay_core::traits::{BroadcastBus, MembershipStore, OutboxStore};
use relay_core::types::NodeId;
use relay_database::MemoryOutboxStore;

use crate::bridge::listener::BusListener;
use crate::bridge::memory_bus::MemoryBus;
use crate::bridge::peers::PeerTracker;
use crate::bridge::reconcile::Reconciler;
use crate::channel::registry::SessionRegistry;
use crate::connection::manager::ConnectionManager;
use crate::dispatch::dispatcher::FanoutDispatcher;
use crate::dispatch::health::NodeHealth;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::presence::monitor::PresenceMonitor;

/// Storage and bus implementations a node runs on.
#[derive(Debug, Clone)]
pub struct NodeBackends {
    /// Durable outbox.
    pub store: Arc<dyn OutboxStore>,
    /// Membership and watermark table.
    pub membership: Arc<dyn MembershipStore>,
    /// Cross-node notification bus.
    pub bus: Arc<dyn BroadcastBus>,
}

impl NodeBackends {
    /// In-memory store and bus; nodes sharing them form one cluster.
    pub fn memory(store: Arc<MemoryOutboxStore>, bus: Arc<MemoryBus>) -> Self {
        Self {
            store: store.clone(),
            membership: store,
            bus,
        }
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Node identifier.
    pub node_id: NodeId,
    /// Live sessions.
    pub sessions: usize,
    /// Topics with local interest.
    pub topics: usize,
    /// Publishes rejected because the outbox is unreachable.
    pub store_unavailable: bool,
    /// Some sequences were evicted before this node replayed them.
    pub retention_gap: bool,
    /// Broadcast bus subscription is up.
    pub bus_connected: bool,
    /// Peers suspected to be partitioned away.
    pub suspected_partitions: Vec<NodeId>,
    /// Counters.
    pub metrics: MetricsSnapshot,
}

/// Central relay node that coordinates all realtime subsystems.
pub struct RelayNode {
    /// This node's identifier.
    pub node_id: NodeId,
    /// Session registry.
    pub registry: Arc<SessionRegistry>,
    /// Connection manager.
    pub connections: Arc<ConnectionManager>,
    /// Fan-out dispatcher.
    pub dispatcher: Arc<FanoutDispatcher>,
    /// Reconciler.
    pub reconciler: Arc<Reconciler>,
    /// Presence monitor.
    pub presence: Arc<PresenceMonitor>,
    /// Degraded-mode state.
    pub health: Arc<NodeHealth>,
    /// Metrics collector.
    pub metrics: Arc<RelayMetrics>,
    listener: Arc<BusListener>,
    bus: Arc<dyn BroadcastBus>,
    config: AppConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl RelayNode {
    /// Creates a node with all subsystems. Nothing runs until [`RelayNode::start`].
    pub fn new(config: &AppConfig, node_id: NodeId, backends: NodeBackends) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let health = Arc::new(NodeHealth::new());
        let registry = Arc::new(SessionRegistry::new());
        let peers = Arc::new(PeerTracker::new(node_id.clone()));

        let dispatcher = Arc::new(FanoutDispatcher::new(
            node_id.clone(),
            backends.store.clone(),
            backends.bus.clone(),
            registry.clone(),
            health.clone(),
            metrics.clone(),
            config.outbox.replay_batch_size,
        ));
        let connections = Arc::new(ConnectionManager::new(
            node_id.clone(),
            config.realtime.clone(),
            registry.clone(),
            dispatcher.clone(),
            metrics.clone(),
        ));
        let listener = Arc::new(BusListener::new(
            node_id.clone(),
            dispatcher.clone(),
            peers.clone(),
            metrics.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            node_id.clone(),
            backends.store,
            backends.membership,
            backends.bus.clone(),
            dispatcher.clone(),
            peers,
            health.clone(),
            config.broadcast.clone(),
            config.outbox.clone(),
        ));
        let presence = Arc::new(PresenceMonitor::new(
            registry.clone(),
            dispatcher.clone(),
            metrics.clone(),
            config.realtime.heartbeat_interval(),
            config.realtime.heartbeat_timeout(),
        ));

        info!(node_id = %node_id, "Relay node initialized");

        Self {
            node_id,
            registry,
            connections,
            dispatcher,
            reconciler,
            presence,
            health,
            metrics,
            listener,
            bus: backends.bus,
            config: config.clone(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled when the node's background work must stop.
    ///
    /// Bus implementations with their own tasks should run under a child
    /// of this token so they stop after sessions are drained.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the bus listener, reconciler and presence monitor.
    pub fn start(&self) {
        // Subscribe before spawning so no notification slips past.
        let events = self.bus.subscribe();
        let handles = vec![
            tokio::spawn(self.listener.clone().run(events, self.cancel.child_token())),
            tokio::spawn(self.reconciler.clone().run(self.cancel.child_token())),
            tokio::spawn(self.presence.clone().run(self.cancel.child_token())),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);

        info!(node_id = %self.node_id, "Relay node started");
    }

    /// Drain sessions, then stop background tasks.
    pub async fn shutdown(&self) {
        info!(node_id = %self.node_id, "Shutting down relay node");

        let closed = self
            .connections
            .drain_all(self.config.realtime.drain_timeout())
            .await;
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!(node_id = %self.node_id, sessions_closed = closed, "Relay node shut down");
    }

    /// Snapshot of the node's state.
    pub fn status(&self) -> NodeStatus {
        let health = self.health.snapshot();
        NodeStatus {
            node_id: self.node_id.clone(),
            sessions: self.registry.session_count(),
            topics: self.registry.topic_count(),
            store_unavailable: health.store_unavailable,
            retention_gap: health.retention_gap,
            bus_connected: self.bus.is_connected(),
            suspected_partitions: health.suspected_partitions,
            metrics: self.metrics.snapshot(),
        }
    }

    /// The configuration the node was built with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config::OutboxBackend;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut config = AppConfig::default();
        config.outbox.backend = OutboxBackend::Memory;
        config.realtime.drain_timeout_ms = 20;

        let node = RelayNode::new(
            &config,
            NodeId::new("node-1"),
            NodeBackends::memory(Arc::new(MemoryOutboxStore::new()), Arc::new(MemoryBus::new(16))),
        );
        node.start();
        let session = node.connections.open("alice").unwrap();

        let status = node.status();
        assert_eq!(status.sessions, 1);
        assert!(!status.store_unavailable);

        node.shutdown().await;
        assert!(session.is_closed());
        assert_eq!(node.status().sessions, 0);
        assert!(node.cancel_token().is_cancelled());
    }
}
