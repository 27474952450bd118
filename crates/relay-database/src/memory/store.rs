//! In-memory outbox and membership store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{MembershipStore, OutboxStore};
use relay_core::types::{NewMessage, NodeId, NodeMembership, OutboxRecord, TopicWatermark};

#[derive(Debug, Default)]
struct TopicLog {
    last_sequence: u64,
    records: BTreeMap<u64, OutboxRecord>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    members: HashMap<NodeId, NodeMembership>,
    watermarks: HashMap<NodeId, HashMap<String, u64>>,
}

/// Outbox kept in process memory.
///
/// Shared between nodes of one process it behaves like the PostgreSQL
/// store, which makes it the backend for multi-node tests. It can be
/// switched unavailable to exercise degraded mode.
#[derive(Debug)]
pub struct MemoryOutboxStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryOutboxStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records currently retained for `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|log| log.records.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::database("In-memory outbox is unavailable"))
        }
    }
}

impl Default for MemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn append(&self, message: NewMessage) -> AppResult<OutboxRecord> {
        self.ensure_available()?;
        let mut state = self.lock();
        let log = state.topics.entry(message.topic.clone()).or_default();
        log.last_sequence += 1;

        let record = OutboxRecord {
            topic: message.topic,
            sequence: log.last_sequence,
            payload: message.payload,
            origin_node: message.origin_node,
            sender: message.sender,
            created_at: Utc::now(),
        };
        log.records.insert(record.sequence, record.clone());
        Ok(record)
    }

    async fn read_after(
        &self,
        topic: &str,
        after: u64,
        limit: usize,
    ) -> AppResult<Vec<OutboxRecord>> {
        self.ensure_available()?;
        let state = self.lock();
        Ok(state
            .topics
            .get(topic)
            .map(|log| {
                log.records
                    .range(after.saturating_add(1)..)
                    .take(limit)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn max_sequence(&self, topic: &str) -> AppResult<u64> {
        self.ensure_available()?;
        Ok(self
            .lock()
            .topics
            .get(topic)
            .map(|log| log.last_sequence)
            .unwrap_or(0))
    }

    async fn evict(&self, older_than: DateTime<Utc>, live_since: DateTime<Utc>) -> AppResult<u64> {
        self.ensure_available()?;
        let mut guard = self.lock();
        let state = &mut *guard;

        let live: Vec<&NodeId> = state
            .members
            .values()
            .filter(|m| m.last_seen >= live_since)
            .map(|m| &m.node_id)
            .collect();

        let mut removed = 0u64;
        for (topic, log) in state.topics.iter_mut() {
            // Lowest watermark among live nodes tracking this topic.
            let floor = live
                .iter()
                .filter_map(|node| state.watermarks.get(*node)?.get(topic).copied())
                .min();

            let before = log.records.len();
            log.records.retain(|sequence, record| {
                let old = record.created_at < older_than;
                let delivered_everywhere = floor.is_none_or(|f| *sequence <= f);
                !(old && delivered_everywhere)
            });
            removed += (before - log.records.len()) as u64;
        }
        Ok(removed)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MembershipStore for MemoryOutboxStore {
    async fn heartbeat(&self, membership: &NodeMembership) -> AppResult<()> {
        self.ensure_available()?;
        self.lock()
            .members
            .insert(membership.node_id.clone(), membership.clone());
        Ok(())
    }

    async fn record_watermarks(
        &self,
        node_id: &NodeId,
        watermarks: &[TopicWatermark],
    ) -> AppResult<()> {
        self.ensure_available()?;
        let mut state = self.lock();
        let previous = state.watermarks.remove(node_id).unwrap_or_default();
        let next = watermarks
            .iter()
            .map(|w| {
                let prior = previous.get(&w.topic).copied().unwrap_or(0);
                (w.topic.clone(), w.sequence.max(prior))
            })
            .collect();
        state.watermarks.insert(node_id.clone(), next);
        Ok(())
    }

    async fn live_nodes(&self, since: DateTime<Utc>) -> AppResult<Vec<NodeMembership>> {
        self.ensure_available()?;
        let mut nodes: Vec<NodeMembership> = self
            .lock()
            .members
            .values()
            .filter(|m| m.last_seen >= since)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }
}
