//! Fan-out dispatcher.
//!
//! Every topic with local interest has a cursor: the highest sequence this
//! node has handed to its sessions. The cursor's async lock serializes
//! the outbox append, live delivery and catch-up for the topic, so local
//! delivery order always matches sequence order.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::{BroadcastBus, OutboxStore};
use relay_core::types::{BusMessage, Message, NewMessage, NodeId, TopicWatermark};

use crate::channel::registry::{SessionRegistry, SubscribeOutcome};
use crate::connection::close::CloseReason;
use crate::connection::handle::{DeliveryOutcome, SessionHandle};
use crate::connection::queue::EnqueueOutcome;
use crate::message::types::OutboundFrame;
use crate::metrics::RelayMetrics;

use super::health::NodeHealth;

#[derive(Debug, Default)]
struct TopicCursor {
    delivered: u64,
    initialized: bool,
}

/// Publishes to the outbox and fans messages out to local sessions.
#[derive(Debug)]
pub struct FanoutDispatcher {
    node_id: NodeId,
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn BroadcastBus>,
    registry: Arc<SessionRegistry>,
    health: Arc<NodeHealth>,
    metrics: Arc<RelayMetrics>,
    cursors: DashMap<String, Arc<Mutex<TopicCursor>>>,
    replay_batch_size: usize,
}

impl FanoutDispatcher {
    /// Create a dispatcher.
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn BroadcastBus>,
        registry: Arc<SessionRegistry>,
        health: Arc<NodeHealth>,
        metrics: Arc<RelayMetrics>,
        replay_batch_size: usize,
    ) -> Self {
        Self {
            node_id,
            store,
            bus,
            registry,
            health,
            metrics,
            cursors: DashMap::new(),
            replay_batch_size: replay_batch_size.max(1),
        }
    }

    fn cursor(&self, topic: &str) -> Arc<Mutex<TopicCursor>> {
        self.cursors
            .entry(topic.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Persist a message, deliver it to local subscribers, and notify peers.
    ///
    /// Returns the assigned sequence. Fails with `ServiceUnavailable`, and
    /// delivers nothing, when the outbox cannot be written.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        sender: Option<String>,
    ) -> AppResult<u64> {
        if self.health.store_unavailable() {
            RelayMetrics::inc(&self.metrics.publish_failures);
            return Err(AppError::service_unavailable(
                "Outbox store unavailable; publish rejected",
            ));
        }

        let cursor = self.cursor(topic);
        let mut cursor = cursor.lock().await;

        let record = match self
            .store
            .append(NewMessage {
                topic: topic.to_string(),
                payload,
                origin_node: self.node_id.clone(),
                sender,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.health.mark_store_unavailable(&e);
                RelayMetrics::inc(&self.metrics.publish_failures);
                return Err(AppError::with_source(
                    ErrorKind::ServiceUnavailable,
                    "Failed to persist message",
                    e,
                ));
            }
        };
        let sequence = record.sequence;

        if !cursor.initialized || !self.registry.has_topic(topic) {
            cursor.delivered = sequence - 1;
            cursor.initialized = true;
        }

        if cursor.delivered + 1 < sequence {
            // Sequences from other nodes have not reached this node yet.
            if let Err(e) = self.replay_locked(topic, &mut cursor).await {
                warn!(
                    topic = %topic,
                    sequence,
                    error = %e,
                    "Catch-up before local delivery failed; reconciliation will deliver"
                );
            }
        }

        if cursor.delivered + 1 == sequence {
            self.deliver_local(&Message::from(record));
            cursor.delivered = sequence;
        }
        drop(cursor);

        if let Err(e) = self.bus.notify(BusMessage::Published {
            topic: topic.to_string(),
            sequence,
            origin_node: self.node_id.clone(),
        }) {
            warn!(topic = %topic, sequence, error = %e, "Broadcast notification not sent; peers will reconcile");
        }

        RelayMetrics::inc(&self.metrics.messages_published);
        debug!(topic = %topic, sequence, "Message published");
        Ok(sequence)
    }

    /// Subscribe `session` to `topic` and confirm with a `SUBSCRIBED` frame.
    ///
    /// With `resume_from`, messages after that sequence up to the node's
    /// current position are replayed to this session alone. Returns the
    /// node's current position for the topic.
    pub async fn subscribe(
        &self,
        session: &SessionHandle,
        topic: &str,
        resume_from: Option<u64>,
    ) -> AppResult<u64> {
        let cursor = self.cursor(topic);
        let mut cursor = cursor.lock().await;

        if !cursor.initialized || !self.registry.has_topic(topic) {
            let head = self.store.max_sequence(topic).await?;
            cursor.delivered = cursor.delivered.max(head);
            cursor.initialized = true;
        }
        let head = cursor.delivered;
        let baseline = resume_from.unwrap_or(head);

        let outcome = self.registry.subscribe(&session.id, topic, baseline)?;
        self.send_control(
            session,
            OutboundFrame::Subscribed {
                topic: topic.to_string(),
                sequence: head,
            },
        );

        if outcome == SubscribeOutcome::Subscribed && baseline < head {
            if let Err(e) = self.replay_to_session(session, topic, baseline, head).await {
                warn!(
                    session_id = %session.id,
                    topic = %topic,
                    error = %e,
                    "Resume replay failed"
                );
                self.send_control(
                    session,
                    OutboundFrame::error("REPLAY_FAILED", "Could not replay missed messages"),
                );
            }
        }

        debug!(session_id = %session.id, topic = %topic, sequence = head, "Subscribed");
        Ok(head)
    }

    async fn replay_to_session(
        &self,
        session: &SessionHandle,
        topic: &str,
        from: u64,
        to: u64,
    ) -> AppResult<usize> {
        let mut position = from;
        let mut replayed = 0;

        while position < to {
            let batch = self
                .store
                .read_after(topic, position, self.replay_batch_size)
                .await?;
            if batch.is_empty() {
                self.send_gap_notice(session, topic, position + 1, to);
                break;
            }

            let full = batch.len() == self.replay_batch_size;
            for record in batch {
                if record.sequence > to {
                    return Ok(replayed);
                }
                if record.sequence > position + 1 {
                    self.send_gap_notice(session, topic, position + 1, record.sequence - 1);
                }
                position = record.sequence;
                if self.deliver_to(session, &Message::from(record)) {
                    replayed += 1;
                }
            }
            if !full {
                break;
            }
        }

        RelayMetrics::add(&self.metrics.messages_replayed, replayed as u64);
        Ok(replayed)
    }

    /// Deliver outbox records this node has not yet handed to its sessions.
    ///
    /// `announced` is the sequence a notification reported; when the cursor
    /// is already there the outbox is not read. Topics without local
    /// interest are skipped.
    pub async fn catch_up(&self, topic: &str, announced: Option<u64>) -> AppResult<usize> {
        let Some(_reader) = self.registry.acquire_reader(topic) else {
            return Ok(0);
        };

        let cursor = self.cursor(topic);
        let mut cursor = cursor.lock().await;
        if !cursor.initialized {
            cursor.delivered = self.store.max_sequence(topic).await?;
            cursor.initialized = true;
            return Ok(0);
        }
        if announced.is_some_and(|sequence| cursor.delivered >= sequence) {
            return Ok(0);
        }

        self.replay_locked(topic, &mut cursor).await
    }

    async fn replay_locked(&self, topic: &str, cursor: &mut TopicCursor) -> AppResult<usize> {
        let mut replayed = 0;

        loop {
            let mut batch = self
                .store
                .read_after(topic, cursor.delivered, self.replay_batch_size)
                .await?;
            if batch.is_empty() {
                let head = self.store.max_sequence(topic).await?;
                if head <= cursor.delivered {
                    break;
                }
                // A record committed after the first read is still retained;
                // only a range with nothing left up to `head` was evicted.
                batch = self
                    .store
                    .read_after(topic, cursor.delivered, self.replay_batch_size)
                    .await?;
                if batch.is_empty() {
                    self.gap(topic, cursor.delivered + 1, head);
                    cursor.delivered = head;
                    break;
                }
            }

            let full = batch.len() == self.replay_batch_size;
            for record in batch {
                if record.sequence > cursor.delivered + 1 {
                    self.gap(topic, cursor.delivered + 1, record.sequence - 1);
                }
                let message = Message::from(record);
                self.deliver_local(&message);
                cursor.delivered = message.sequence;
                replayed += 1;
            }
            if !full {
                break;
            }
        }

        RelayMetrics::add(&self.metrics.messages_replayed, replayed as u64);
        Ok(replayed)
    }

    /// Catch up every topic with local interest.
    ///
    /// Returns the number of messages replayed.
    pub async fn reconcile_all(&self) -> usize {
        let mut total = 0;
        for topic in self.registry.topic_names() {
            match self.catch_up(&topic, None).await {
                Ok(replayed) => total += replayed,
                Err(e) => {
                    if e.is_store_failure() {
                        self.health.mark_store_unavailable(&e);
                    }
                    warn!(topic = %topic, error = %e, "Reconciliation failed for topic");
                }
            }
        }
        if total > 0 {
            info!(replayed = total, "Reconciliation delivered missed messages");
        }
        total
    }

    /// Offer `message` to every local subscriber of its topic.
    ///
    /// Returns the number of sessions it was enqueued for.
    pub fn deliver_local(&self, message: &Message) -> usize {
        let mut delivered = 0;
        for id in self.registry.subscribers_of(&message.topic) {
            let Some(session) = self.registry.session(&id) else {
                continue;
            };
            if self.deliver_to(&session, message) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver_to(&self, session: &SessionHandle, message: &Message) -> bool {
        match session.deliver(message) {
            DeliveryOutcome::Delivered => {
                RelayMetrics::inc(&self.metrics.messages_delivered);
                true
            }
            DeliveryOutcome::DeliveredWithDrop => {
                RelayMetrics::inc(&self.metrics.messages_delivered);
                RelayMetrics::inc(&self.metrics.messages_dropped);
                debug!(session_id = %session.id, topic = %message.topic, "Queue full, dropped oldest frame");
                true
            }
            DeliveryOutcome::Duplicate => {
                RelayMetrics::inc(&self.metrics.duplicates_suppressed);
                false
            }
            DeliveryOutcome::Overflow => {
                self.disconnect_slow_consumer(session);
                false
            }
            DeliveryOutcome::NotSubscribed | DeliveryOutcome::Closed => false,
        }
    }

    fn send_control(&self, session: &SessionHandle, frame: OutboundFrame) {
        if session.push(frame) == EnqueueOutcome::Overflow {
            self.disconnect_slow_consumer(session);
        }
    }

    fn disconnect_slow_consumer(&self, session: &SessionHandle) {
        if self.registry.close(&session.id, CloseReason::slow_consumer()) {
            RelayMetrics::inc(&self.metrics.slow_consumer_disconnects);
            self.metrics.session_closed();
            warn!(
                session_id = %session.id,
                user_id = %session.user_id,
                capacity = session.queue().capacity(),
                "Outbound queue overflowed, disconnecting slow consumer"
            );
        }
    }

    fn gap(&self, topic: &str, from: u64, to: u64) {
        RelayMetrics::add(&self.metrics.retention_gaps, to - from + 1);
        self.health.report_retention_gap(topic, from, to);
    }

    /// Tell one resuming session its range is gone. The node itself is not
    /// behind, so only the counter moves.
    fn send_gap_notice(&self, session: &SessionHandle, topic: &str, from: u64, to: u64) {
        RelayMetrics::add(&self.metrics.resume_gaps, to - from + 1);
        debug!(
            session_id = %session.id,
            topic = %topic,
            from_sequence = from,
            to_sequence = to,
            "Resume point no longer retained"
        );
        self.send_control(
            session,
            OutboundFrame::error(
                "MESSAGES_EXPIRED",
                format!("Sequences {from}..={to} of {topic} are no longer retained"),
            ),
        );
    }

    /// Delivered position per topic with local interest.
    pub async fn watermarks(&self) -> Vec<TopicWatermark> {
        let cursors: Vec<(String, Arc<Mutex<TopicCursor>>)> = self
            .cursors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut watermarks = Vec::with_capacity(cursors.len());
        for (topic, cursor) in cursors {
            if !self.registry.has_topic(&topic) {
                continue;
            }
            let cursor = cursor.lock().await;
            if cursor.initialized {
                watermarks.push(TopicWatermark {
                    topic,
                    sequence: cursor.delivered,
                });
            }
        }
        watermarks.sort_by(|a, b| a.topic.cmp(&b.topic));
        watermarks
    }

    /// Current delivered position for `topic`, if tracked and not busy.
    pub fn position(&self, topic: &str) -> Option<u64> {
        let cursor = self.cursors.get(topic)?.value().clone();
        let cursor = cursor.try_lock().ok()?;
        cursor.initialized.then_some(cursor.delivered)
    }

    /// Drop cursors of topics that lost all local interest.
    pub fn prune_cursors(&self) -> usize {
        let before = self.cursors.len();
        self.cursors
            .retain(|topic, cursor| self.registry.has_topic(topic) || cursor.try_lock().is_err());
        before.saturating_sub(self.cursors.len())
    }

    /// Number of tracked topic cursors.
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }
}
