//! Outbox repository: gap-free per-topic append and ordered replay.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::OutboxStore;
use relay_core::types::{NewMessage, NodeId, OutboxRecord};

/// Row shape of the `outbox` table.
#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    topic: String,
    sequence: i64,
    payload: Vec<u8>,
    origin_node: String,
    sender: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            topic: row.topic,
            sequence: row.sequence as u64,
            payload: Bytes::from(row.payload),
            origin_node: NodeId::new(row.origin_node),
            sender: row.sender,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed [`OutboxStore`].
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    /// Create a new outbox repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    async fn append(&self, message: NewMessage) -> AppResult<OutboxRecord> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin outbox transaction", e)
        })?;

        // The counter row stays locked until commit, serialising appends per topic
        // across every node; a rollback returns the sequence.
        let sequence: i64 = sqlx::query_scalar(
            "INSERT INTO topic_sequences (topic, last_sequence) VALUES ($1, 1) \
             ON CONFLICT (topic) DO UPDATE SET last_sequence = topic_sequences.last_sequence + 1 \
             RETURNING last_sequence",
        )
        .bind(&message.topic)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to reserve sequence", e))?;

        let row = sqlx::query_as::<_, OutboxRow>(
            "INSERT INTO outbox (topic, sequence, payload, origin_node, sender) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING topic, sequence, payload, origin_node, sender, created_at",
        )
        .bind(&message.topic)
        .bind(sequence)
        .bind(message.payload.as_ref())
        .bind(message.origin_node.as_str())
        .bind(message.sender.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to append outbox record", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit outbox record", e)
        })?;

        Ok(row.into())
    }

    async fn read_after(
        &self,
        topic: &str,
        after: u64,
        limit: usize,
    ) -> AppResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT topic, sequence, payload, origin_node, sender, created_at FROM outbox \
             WHERE topic = $1 AND sequence > $2 ORDER BY sequence ASC LIMIT $3",
        )
        .bind(topic)
        .bind(after as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to read outbox range", e))?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn max_sequence(&self, topic: &str) -> AppResult<u64> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_sequence FROM topic_sequences WHERE topic = $1")
                .bind(topic)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to read topic sequence", e)
                })?;

        Ok(last.unwrap_or(0) as u64)
    }

    async fn evict(&self, older_than: DateTime<Utc>, live_since: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox o WHERE o.created_at < $1 AND NOT EXISTS ( \
                 SELECT 1 FROM node_watermarks w \
                 JOIN node_membership m ON m.node_id = w.node_id \
                 WHERE w.topic = o.topic AND w.sequence < o.sequence AND m.last_seen >= $2 \
             )",
        )
        .bind(older_than)
        .bind(live_since)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to evict outbox records", e))?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> AppResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Health check failed", e))
    }
}
