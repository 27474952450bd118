//! Connection manager: session lifecycle and inbound frame routing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use relay_core::config::RealtimeConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::types::{NodeId, SessionId};

use crate::channel::registry::SessionRegistry;
use crate::dispatch::dispatcher::FanoutDispatcher;
use crate::message::serializer::deserialize_inbound;
use crate::message::types::{InboundFrame, OutboundFrame};
use crate::message::validator::{validate_inbound, validate_topic};
use crate::metrics::RelayMetrics;

use super::close::CloseReason;
use super::handle::{SessionHandle, SessionState};
use super::queue::EnqueueOutcome;

/// Poll period while waiting for queues to flush during drain.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Manages all sessions hosted by this node.
#[derive(Debug)]
pub struct ConnectionManager {
    node_id: NodeId,
    config: RealtimeConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<FanoutDispatcher>,
    metrics: Arc<RelayMetrics>,
    accepting: AtomicBool,
}

impl ConnectionManager {
    /// Creates a new connection manager.
    pub fn new(
        node_id: NodeId,
        config: RealtimeConfig,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<FanoutDispatcher>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            node_id,
            config,
            registry,
            dispatcher,
            metrics,
            accepting: AtomicBool::new(true),
        }
    }

    /// Accept a session for `user_id` and move it to `Open`.
    ///
    /// An existing session of the same user on this node is closed as
    /// replaced.
    pub fn open(&self, user_id: &str) -> AppResult<Arc<SessionHandle>> {
        if !self.is_accepting() {
            return Err(AppError::service_unavailable("Node is shutting down"));
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::validation("User id must not be empty"));
        }

        let session = Arc::new(SessionHandle::new(
            user_id,
            self.node_id.clone(),
            self.config.queue_capacity,
            self.config.overflow_policy,
        ));

        if let Some(previous) = self.registry.register(session.clone()) {
            info!(
                session_id = %previous.id,
                user_id = %user_id,
                "Closing session replaced by a new connection"
            );
            self.close_session(&previous.id, CloseReason::replaced());
        }

        session.mark_open();
        self.metrics.session_opened();

        info!(
            session_id = %session.id,
            user_id = %user_id,
            node_id = %self.node_id,
            "Session opened"
        );
        Ok(session)
    }

    /// Processes an inbound text frame.
    pub async fn handle_text(&self, session_id: &SessionId, raw: &str) {
        let Some(session) = self.registry.session(session_id) else {
            debug!(session_id = %session_id, "Frame from unknown session");
            return;
        };

        if let Err(e) = validate_inbound(raw, self.config.max_frame_bytes) {
            self.protocol_violation(&session, "invalid frame", e.message);
            return;
        }
        let frame = match deserialize_inbound(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.protocol_violation(&session, "malformed frame", e);
                return;
            }
        };

        session.touch();
        RelayMetrics::inc(&self.metrics.frames_received);

        match frame {
            InboundFrame::Subscribe { topic, sequence } => {
                self.handle_subscribe(&session, &topic, sequence).await;
            }
            InboundFrame::Unsubscribe { topic } => {
                if self.registry.unsubscribe(&session.id, &topic) {
                    debug!(session_id = %session.id, topic = %topic, "Unsubscribed");
                }
                self.send(&session, OutboundFrame::Unsubscribed { topic });
            }
            InboundFrame::Publish { topic, payload } => {
                self.handle_publish(&session, &topic, payload).await;
            }
            InboundFrame::Ack { topic, sequence } => {
                debug!(session_id = %session.id, topic = %topic, sequence, "Acknowledged");
            }
            InboundFrame::Ping => {
                self.send(&session, OutboundFrame::pong());
            }
            InboundFrame::Pong => {}
        }
    }

    /// Binary frames are not part of the protocol.
    pub fn handle_binary(&self, session_id: &SessionId) {
        if let Some(session) = self.registry.session(session_id) {
            self.protocol_violation(&session, "binary frames not supported", "binary frame");
        }
    }

    /// Record transport-level liveness (WebSocket ping/pong).
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(session) = self.registry.session(session_id) {
            session.touch();
        }
    }

    async fn handle_subscribe(&self, session: &SessionHandle, topic: &str, resume: Option<u64>) {
        if let Err(e) = validate_topic(topic) {
            self.send(session, OutboundFrame::error("INVALID_TOPIC", e.message));
            return;
        }

        let max = self.config.max_subscriptions_per_session;
        if !session.is_subscribed(topic) && session.subscription_count() >= max {
            self.send(
                session,
                OutboundFrame::error(
                    "MAX_SUBSCRIPTIONS",
                    format!("Maximum subscriptions ({max}) reached"),
                ),
            );
            return;
        }

        if let Err(e) = self.dispatcher.subscribe(session, topic, resume).await {
            warn!(session_id = %session.id, topic = %topic, error = %e, "Subscribe failed");
            self.send(
                session,
                OutboundFrame::error("SUBSCRIBE_FAILED", format!("Could not subscribe to {topic}")),
            );
        }
    }

    async fn handle_publish(&self, session: &SessionHandle, topic: &str, payload: String) {
        if let Err(e) = validate_topic(topic) {
            self.send(session, OutboundFrame::error("INVALID_TOPIC", e.message));
            return;
        }

        match self
            .dispatcher
            .publish(topic, Bytes::from(payload), Some(session.user_id.clone()))
            .await
        {
            Ok(sequence) => self.send(
                session,
                OutboundFrame::Published {
                    topic: topic.to_string(),
                    sequence,
                },
            ),
            Err(e) => {
                warn!(session_id = %session.id, topic = %topic, error = %e, "Publish failed");
                self.send(session, OutboundFrame::error("PUBLISH_FAILED", e.message));
            }
        }
    }

    fn send(&self, session: &SessionHandle, frame: OutboundFrame) {
        if session.push(frame) == EnqueueOutcome::Overflow
            && self.close_session(&session.id, CloseReason::slow_consumer())
        {
            RelayMetrics::inc(&self.metrics.slow_consumer_disconnects);
            warn!(session_id = %session.id, "Outbound queue overflowed, disconnecting slow consumer");
        }
    }

    /// The close frame carries only the short `reason`; `detail` is logged.
    fn protocol_violation(
        &self,
        session: &SessionHandle,
        reason: &str,
        detail: impl std::fmt::Display,
    ) {
        if self.close_session(&session.id, CloseReason::protocol(reason)) {
            RelayMetrics::inc(&self.metrics.protocol_violations);
            warn!(session_id = %session.id, reason = %reason, detail = %detail, "Protocol violation, closing session");
        }
    }

    /// Close a session and release its subscriptions.
    ///
    /// Returns `false` when it was already closed.
    pub fn close_session(&self, session_id: &SessionId, reason: CloseReason) -> bool {
        let code = reason.code;
        if !self.registry.close(session_id, reason) {
            return false;
        }
        self.metrics.session_closed();
        info!(session_id = %session_id, code, "Session closed");
        true
    }

    /// Stop accepting sessions, flush every queue, then close all sessions.
    ///
    /// Waits at most `timeout` for writer loops to drain. Returns the
    /// number of sessions closed.
    pub async fn drain_all(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let sessions = self.registry.sessions();
        for session in &sessions {
            session.begin_drain();
        }
        info!(sessions = sessions.len(), "Draining sessions");

        let deadline = tokio::time::Instant::now() + timeout;
        while sessions
            .iter()
            .any(|s| s.state() == SessionState::Draining && !s.queue().is_empty())
        {
            if tokio::time::Instant::now() >= deadline {
                warn!("Drain timeout reached with frames still queued");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        sessions
            .iter()
            .filter(|s| self.close_session(&s.id, CloseReason::shutdown()))
            .count()
    }

    /// Whether new sessions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    /// Look up a live session.
    pub fn session(&self, session_id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.registry.session(session_id)
    }

    /// Session configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}
