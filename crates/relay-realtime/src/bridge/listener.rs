//! Consumes bus events and triggers catch-up for announced topics.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::types::{BusEvent, BusMessage, NodeId};

use crate::dispatch::dispatcher::FanoutDispatcher;
use crate::metrics::RelayMetrics;

use super::peers::PeerTracker;

/// Routes bus notifications to the dispatcher.
///
/// Own notifications are ignored: the publishing node already delivered
/// locally. Lost notifications and lag are repaired by reconciling every
/// topic.
#[derive(Debug)]
pub struct BusListener {
    node_id: NodeId,
    dispatcher: Arc<FanoutDispatcher>,
    peers: Arc<PeerTracker>,
    metrics: Arc<RelayMetrics>,
}

impl BusListener {
    /// Create a listener for `node_id`.
    pub fn new(
        node_id: NodeId,
        dispatcher: Arc<FanoutDispatcher>,
        peers: Arc<PeerTracker>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            node_id,
            dispatcher,
            peers,
            metrics,
        }
    }

    /// Process events until cancelled or the bus closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<BusEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(BusEvent::Message(message)) => self.handle_message(message),
                Ok(BusEvent::Reconnected) => {
                    RelayMetrics::inc(&self.metrics.bus_reconnects);
                    info!("Broadcast bus reconnected, reconciling all topics");
                    self.spawn_reconcile();
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus listener lagged, reconciling all topics");
                    self.spawn_reconcile();
                }
                Err(RecvError::Closed) => {
                    warn!("Broadcast bus closed");
                    break;
                }
            }
        }

        debug!("Bus listener stopped");
    }

    /// Handle one notification.
    pub fn handle_message(&self, message: BusMessage) {
        let origin = message.origin_node();
        if *origin == self.node_id {
            RelayMetrics::inc(&self.metrics.echoes_ignored);
            return;
        }
        self.peers.heard(origin);

        if let BusMessage::Published {
            topic, sequence, ..
        } = message
        {
            RelayMetrics::inc(&self.metrics.notifications_received);
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.catch_up(&topic, Some(sequence)).await {
                    warn!(topic = %topic, sequence, error = %e, "Catch-up after notification failed");
                }
            });
        }
    }

    fn spawn_reconcile(&self) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.reconcile_all().await;
        });
    }
}
