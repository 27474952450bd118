//! Individual session handle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use relay_core::config::OverflowPolicy;
use relay_core::types::{Message, NodeId, SessionId};

use crate::message::types::OutboundFrame;

use super::close::CloseReason;
use super::queue::{EnqueueOutcome, OutboundQueue};

/// Lifecycle of a session.
///
/// Transitions only move forward: `Connecting -> Open -> Draining -> Closed`,
/// and any state may jump straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, not yet registered.
    Connecting = 0,
    /// Registered and exchanging frames.
    Open = 1,
    /// Flushing its queue before closing.
    Draining = 2,
    /// Terminal.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Outcome of offering a message to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Enqueued.
    Delivered,
    /// Enqueued after the oldest queued frame was discarded.
    DeliveredWithDrop,
    /// Already enqueued an equal or later sequence for this topic.
    Duplicate,
    /// Session is not subscribed to the topic.
    NotSubscribed,
    /// Queue full under the disconnect policy.
    Overflow,
    /// Session no longer accepts frames.
    Closed,
}

/// A live client session on this node.
///
/// The topic map doubles as the per-session dedup table: each subscribed
/// topic maps to the highest sequence already enqueued for it.
#[derive(Debug)]
pub struct SessionHandle {
    /// Unique session ID
    pub id: SessionId,
    /// User who owns the session
    pub user_id: String,
    /// Node hosting the session
    pub node_id: NodeId,
    /// When the session was accepted
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
    topics: Mutex<HashMap<String, u64>>,
    queue: OutboundQueue,
    last_heartbeat: Mutex<Instant>,
    close_reason: Mutex<Option<CloseReason>>,
}

impl SessionHandle {
    /// Create a session in the `Connecting` state.
    pub fn new(
        user_id: impl Into<String>,
        node_id: NodeId,
        queue_capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            node_id,
            connected_at: Utc::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            topics: Mutex::new(HashMap::new()),
            queue: OutboundQueue::new(queue_capacity, policy),
            last_heartbeat: Mutex::new(Instant::now()),
            close_reason: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `Connecting -> Open`.
    pub fn mark_open(&self) -> bool {
        self.advance(SessionState::Connecting, SessionState::Open)
    }

    /// `Open -> Draining`. The queue stops accepting frames.
    pub fn begin_drain(&self) -> bool {
        let moved = self.advance(SessionState::Open, SessionState::Draining);
        if moved {
            self.queue.close();
        }
        moved
    }

    /// Move to `Closed` from any state.
    ///
    /// Returns `true` for the caller that performed the transition; the
    /// reason is recorded only then.
    pub fn mark_closed(&self, reason: CloseReason) -> bool {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::SeqCst);
        if previous == SessionState::Closed as u8 {
            return false;
        }
        *self
            .close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reason);
        self.queue.close();
        true
    }

    /// Whether the session reached `Closed`.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Reason recorded when the session closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record inbound liveness.
    pub fn touch(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn silence(&self) -> std::time::Duration {
        self.last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// The outbound queue.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Enqueue a control frame.
    pub fn push(&self, frame: OutboundFrame) -> EnqueueOutcome {
        self.queue.push(frame)
    }

    /// Offer a topic message, honoring subscription and sequence dedup.
    pub fn deliver(&self, message: &Message) -> DeliveryOutcome {
        let mut topics = self.lock_topics();
        let Some(last) = topics.get_mut(&message.topic) else {
            return DeliveryOutcome::NotSubscribed;
        };
        if message.sequence <= *last {
            return DeliveryOutcome::Duplicate;
        }

        match self.queue.push(OutboundFrame::message(message)) {
            EnqueueOutcome::Queued => {
                *last = message.sequence;
                DeliveryOutcome::Delivered
            }
            EnqueueOutcome::DroppedOldest => {
                *last = message.sequence;
                DeliveryOutcome::DeliveredWithDrop
            }
            EnqueueOutcome::Overflow => DeliveryOutcome::Overflow,
            EnqueueOutcome::Rejected => DeliveryOutcome::Closed,
        }
    }

    /// Whether the session is subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.lock_topics().contains_key(topic)
    }

    /// Subscribed topic names.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock_topics().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of subscribed topics.
    pub fn subscription_count(&self) -> usize {
        self.lock_topics().len()
    }

    /// Highest sequence enqueued for `topic`.
    pub fn last_sequence(&self, topic: &str) -> Option<u64> {
        self.lock_topics().get(topic).copied()
    }

    pub(crate) fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn session(capacity: usize, policy: OverflowPolicy) -> SessionHandle {
        SessionHandle::new("alice", NodeId::new("node-1"), capacity, policy)
    }

    fn message(topic: &str, sequence: u64) -> Message {
        Message {
            topic: topic.to_string(),
            sequence,
            payload: Bytes::from_static(b"x"),
            origin_node: NodeId::new("node-1"),
            sender: None,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_transitions_move_forward() {
        let s = session(4, OverflowPolicy::DropOldest);
        assert_eq!(s.state(), SessionState::Connecting);
        assert!(!s.begin_drain());
        assert!(s.mark_open());
        assert!(!s.mark_open());
        assert!(s.begin_drain());
        assert!(s.queue().is_closed());
        assert!(s.mark_closed(CloseReason::shutdown()));
        assert!(!s.mark_closed(CloseReason::heartbeat_timeout()));
        assert_eq!(s.close_reason(), Some(CloseReason::shutdown()));
    }

    #[test]
    fn test_deliver_requires_subscription_and_dedups() {
        let s = session(4, OverflowPolicy::DropOldest);
        assert_eq!(s.deliver(&message("t", 1)), DeliveryOutcome::NotSubscribed);

        s.lock_topics().insert("t".to_string(), 0);
        assert_eq!(s.deliver(&message("t", 1)), DeliveryOutcome::Delivered);
        assert_eq!(s.deliver(&message("t", 1)), DeliveryOutcome::Duplicate);
        assert_eq!(s.deliver(&message("t", 2)), DeliveryOutcome::Delivered);
        assert_eq!(s.last_sequence("t"), Some(2));
    }

    #[test]
    fn test_overflow_does_not_advance_watermark() {
        let s = session(1, OverflowPolicy::Disconnect);
        s.lock_topics().insert("t".to_string(), 0);
        assert_eq!(s.deliver(&message("t", 1)), DeliveryOutcome::Delivered);
        assert_eq!(s.deliver(&message("t", 2)), DeliveryOutcome::Overflow);
        assert_eq!(s.last_sequence("t"), Some(1));
    }

    #[test]
    fn test_closed_session_rejects_delivery() {
        let s = session(4, OverflowPolicy::DropOldest);
        s.lock_topics().insert("t".to_string(), 0);
        s.mark_closed(CloseReason::client_gone());
        assert_eq!(s.deliver(&message("t", 1)), DeliveryOutcome::Closed);
    }
}
