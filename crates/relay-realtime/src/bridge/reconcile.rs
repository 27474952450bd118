//! Periodic reconciliation, membership heartbeat and outbox retention.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::config::{BroadcastConfig, OutboxConfig};
use relay_core::traits::{BroadcastBus, MembershipStore, OutboxStore};
use relay_core::types::{BusMessage, NodeId, NodeMembership};

use crate::dispatch::dispatcher::FanoutDispatcher;
use crate::dispatch::health::NodeHealth;

use super::peers::PeerTracker;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Messages delivered from the outbox.
    pub replayed: usize,
    /// Whether the outbox store answered.
    pub store_reachable: bool,
    /// Peers suspected to be partitioned.
    pub suspected_partitions: usize,
}

/// Background reconciler for one node.
///
/// Each pass catches up every topic with local interest, beacons on the
/// bus, refreshes the membership row and watermarks, and checks for
/// partitioned peers. While degraded it only probes the store.
#[derive(Debug)]
pub struct Reconciler {
    node_id: NodeId,
    store: Arc<dyn OutboxStore>,
    membership: Arc<dyn MembershipStore>,
    bus: Arc<dyn BroadcastBus>,
    dispatcher: Arc<FanoutDispatcher>,
    peers: Arc<PeerTracker>,
    health: Arc<NodeHealth>,
    broadcast: BroadcastConfig,
    outbox: OutboxConfig,
}

impl Reconciler {
    /// Create a reconciler.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn OutboxStore>,
        membership: Arc<dyn MembershipStore>,
        bus: Arc<dyn BroadcastBus>,
        dispatcher: Arc<FanoutDispatcher>,
        peers: Arc<PeerTracker>,
        health: Arc<NodeHealth>,
        broadcast: BroadcastConfig,
        outbox: OutboxConfig,
    ) -> Self {
        Self {
            node_id,
            store,
            membership,
            bus,
            dispatcher,
            peers,
            health,
            broadcast,
            outbox,
        }
    }

    /// Run passes every reconcile interval, starting one interval after
    /// the call, and eviction every eviction interval, until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.broadcast.reconcile_interval();
        // First pass one period after start.
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_eviction = Instant::now();

        info!(
            interval_ms = self.broadcast.reconcile_interval_ms,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.pass().await;
            debug!(
                replayed = report.replayed,
                store_reachable = report.store_reachable,
                "Reconciliation pass complete"
            );

            if report.store_reachable && last_eviction.elapsed() >= self.outbox.eviction_interval() {
                self.evict().await;
                last_eviction = Instant::now();
            }
        }

        info!("Reconciler stopped");
    }

    /// Run one reconciliation pass.
    pub async fn pass(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if let Err(e) = self.bus.notify(BusMessage::Heartbeat {
            origin_node: self.node_id.clone(),
        }) {
            debug!(error = %e, "Bus heartbeat not sent");
        }

        if self.health.store_unavailable() {
            match self.store.health_check().await {
                Ok(true) => self.health.mark_store_recovered(),
                Ok(false) => return report,
                Err(e) => {
                    debug!(error = %e, "Outbox store still unreachable");
                    return report;
                }
            }
        }
        report.store_reachable = true;
        report.replayed = self.dispatcher.reconcile_all().await;

        let now = Utc::now();
        let membership = NodeMembership {
            node_id: self.node_id.clone(),
            channel_name: self.broadcast.channel_name.clone(),
            last_seen: now,
        };
        if let Err(e) = self.membership.heartbeat(&membership).await {
            warn!(error = %e, "Failed to refresh node membership");
        }

        let watermarks = self.dispatcher.watermarks().await;
        if let Err(e) = self
            .membership
            .record_watermarks(&self.node_id, &watermarks)
            .await
        {
            warn!(error = %e, topics = watermarks.len(), "Failed to record watermarks");
        }

        match self.membership.live_nodes(now - self.liveness()).await {
            Ok(live) => {
                let suspected = self
                    .peers
                    .suspected(&live, self.broadcast.partition_threshold());
                report.suspected_partitions = suspected.len();
                self.health.set_suspected_partitions(suspected);
            }
            Err(e) => warn!(error = %e, "Failed to list live nodes"),
        }

        report
    }

    /// Delete outbox records past retention that every live node has
    /// delivered. Returns the number removed.
    pub async fn evict(&self) -> u64 {
        let now = Utc::now();
        let older_than = now - TimeDelta::seconds(self.outbox.retention_seconds as i64);
        match self.store.evict(older_than, now - self.liveness()).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Evicted delivered outbox records past retention");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Outbox eviction failed");
                0
            }
        }
    }

    fn liveness(&self) -> TimeDelta {
        TimeDelta::seconds(self.outbox.node_liveness_seconds as i64)
    }
}
