//! Durable outbox and membership storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::result::AppResult;
use crate::types::id::NodeId;
use crate::types::membership::{NodeMembership, TopicWatermark};
use crate::types::message::{NewMessage, OutboxRecord};

/// Append-only, per-topic ordered log of published messages.
///
/// Implementations must reserve the next per-topic sequence and persist the
/// record atomically: a failed append consumes no sequence, so the log stays
/// gap-free.
#[async_trait]
pub trait OutboxStore: Send + Sync + std::fmt::Debug + 'static {
    /// Reserve the next sequence for `message.topic` and persist the record.
    async fn append(&self, message: NewMessage) -> AppResult<OutboxRecord>;

    /// Records with `sequence > after`, ascending, at most `limit`.
    async fn read_after(&self, topic: &str, after: u64, limit: usize)
    -> AppResult<Vec<OutboxRecord>>;

    /// Highest sequence ever assigned for `topic` (0 when none).
    async fn max_sequence(&self, topic: &str) -> AppResult<u64>;

    /// Delete records created before `older_than` that every node seen since
    /// `live_since` has already delivered. Returns the number removed.
    async fn evict(&self, older_than: DateTime<Utc>, live_since: DateTime<Utc>) -> AppResult<u64>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}

/// Node liveness and per-topic watermark bookkeeping.
#[async_trait]
pub trait MembershipStore: Send + Sync + std::fmt::Debug + 'static {
    /// Upsert this node's membership row.
    async fn heartbeat(&self, membership: &NodeMembership) -> AppResult<()>;

    /// Record the delivered watermarks of `node_id`.
    async fn record_watermarks(
        &self,
        node_id: &NodeId,
        watermarks: &[TopicWatermark],
    ) -> AppResult<()>;

    /// Nodes seen at or after `since`.
    async fn live_nodes(&self, since: DateTime<Utc>) -> AppResult<Vec<NodeMembership>>;
}
