//! Session registry: live sessions and the topic subscriber index.
//!
//! Lock order is always session topic map first, then the topic shard.
//! Fan-out reads a snapshot of a topic's subscribers and releases the
//! shard before touching any session, so no path acquires them in the
//! reverse order.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::types::SessionId;

use crate::connection::close::CloseReason;
use crate::connection::handle::SessionHandle;

use super::topic::Topic;

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Newly subscribed.
    Subscribed,
    /// Was already subscribed; nothing changed.
    AlreadySubscribed,
}

/// Registry of live sessions and topic memberships on this node.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    by_user: DashMap<String, SessionId>,
    topics: DashMap<String, Topic>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    ///
    /// A user holds at most one session per node: the session this one
    /// replaces is returned, still registered, for the caller to close.
    pub fn register(&self, session: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let previous = self
            .by_user
            .insert(session.user_id.clone(), session.id)
            .filter(|prev| *prev != session.id)
            .and_then(|prev| self.session(&prev));
        self.sessions.insert(session.id, session);
        previous
    }

    /// Remove a session and every subscription it holds. Idempotent.
    pub fn unregister(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let (_, session) = self.sessions.remove(id)?;
        self.by_user.remove_if(&session.user_id, |_, current| current == id);

        let topics: Vec<String> = {
            let mut map = session.lock_topics();
            let names: Vec<String> = map.keys().cloned().collect();
            for name in &names {
                self.detach(name, id);
            }
            map.clear();
            names
        };
        debug!(session_id = %id, topics = topics.len(), "Session unregistered");
        Some(session)
    }

    /// Close a session and unregister it.
    ///
    /// Returns `false` when another caller already closed it.
    pub fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.session(id) else {
            return false;
        };
        let closed = session.mark_closed(reason);
        self.unregister(id);
        closed
    }

    /// Subscribe a session to a topic.
    ///
    /// `baseline` seeds the session's dedup watermark: only sequences
    /// above it will be delivered.
    pub fn subscribe(
        &self,
        id: &SessionId,
        topic: &str,
        baseline: u64,
    ) -> AppResult<SubscribeOutcome> {
        let session = self
            .session(id)
            .ok_or_else(|| AppError::not_found(format!("Session {id} is not registered")))?;

        let mut map = session.lock_topics();
        if session.is_closed() {
            return Err(AppError::not_found(format!("Session {id} is closed")));
        }
        if map.contains_key(topic) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }
        map.insert(topic.to_string(), baseline);
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribers
            .insert(*id);
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Unsubscribe a session from a topic.
    ///
    /// Queued frames for the topic are discarded before this returns.
    pub fn unsubscribe(&self, id: &SessionId, topic: &str) -> bool {
        let Some(session) = self.session(id) else {
            return false;
        };

        let mut map = session.lock_topics();
        if map.remove(topic).is_none() {
            return false;
        }
        self.detach(topic, id);
        session.queue().purge_topic(topic);
        true
    }

    fn detach(&self, topic: &str, id: &SessionId) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.subscribers.remove(id);
        }
        self.topics.remove_if(topic, |_, t| t.is_idle());
    }

    /// Snapshot of a topic's subscribers.
    pub fn subscribers_of(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Look up a live session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// The current session of `user_id`.
    pub fn session_for_user(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        let id = *self.by_user.get(user_id)?;
        self.session(&id)
    }

    /// All live sessions.
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Whether any local session is subscribed to `topic` or a reader holds it.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Names of topics with local interest.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Pin a topic against collection while a catch-up read runs.
    ///
    /// Returns `None` when the topic has no local interest.
    pub fn acquire_reader(&self, topic: &str) -> Option<ReaderGuard<'_>> {
        let mut entry = self.topics.get_mut(topic)?;
        entry.readers += 1;
        Some(ReaderGuard {
            registry: self,
            topic: topic.to_string(),
        })
    }

    fn release_reader(&self, topic: &str) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.readers = entry.readers.saturating_sub(1);
        }
        self.topics.remove_if(topic, |_, t| t.is_idle());
    }

    /// Remove topics with no subscribers and no active readers.
    pub fn collect_idle_topics(&self) -> Vec<String> {
        let idle: Vec<String> = self
            .topics
            .iter()
            .filter(|t| t.is_idle())
            .map(|t| t.key().clone())
            .collect();

        idle.into_iter()
            .filter(|name| self.topics.remove_if(name, |_, t| t.is_idle()).is_some())
            .collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of topics with local interest.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Subscriber count for one topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }
}

/// Keeps a topic alive while catch-up reads the outbox for it.
#[derive(Debug)]
pub struct ReaderGuard<'a> {
    registry: &'a SessionRegistry,
    topic: String,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.registry.release_reader(&self.topic);
    }
}
