//! Published messages and their durable outbox form.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::id::NodeId;

/// A message about to be appended; the store assigns its sequence.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Destination topic.
    pub topic: String,
    /// Opaque payload.
    pub payload: Bytes,
    /// Node that accepted the publish.
    pub origin_node: NodeId,
    /// Publishing user, when known.
    pub sender: Option<String>,
}

/// Durable copy of a message, keyed by `(topic, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    /// Topic name.
    pub topic: String,
    /// Per-topic sequence, gap-free from 1.
    pub sequence: u64,
    /// Opaque payload.
    pub payload: Bytes,
    /// Node that accepted the publish.
    pub origin_node: NodeId,
    /// Publishing user, when known.
    pub sender: Option<String>,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// A message as delivered to sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic name.
    pub topic: String,
    /// Per-topic sequence.
    pub sequence: u64,
    /// Opaque payload.
    pub payload: Bytes,
    /// Node that accepted the publish.
    pub origin_node: NodeId,
    /// Publishing user, when known.
    pub sender: Option<String>,
    /// Publish timestamp.
    pub published_at: DateTime<Utc>,
}

impl From<OutboxRecord> for Message {
    fn from(record: OutboxRecord) -> Self {
        Self {
            topic: record.topic,
            sequence: record.sequence,
            payload: record.payload,
            origin_node: record.origin_node,
            sender: record.sender,
            published_at: record.created_at,
        }
    }
}
