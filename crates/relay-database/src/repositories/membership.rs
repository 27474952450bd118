//! Node membership and watermark repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::MembershipStore;
use relay_core::types::{NodeId, NodeMembership, TopicWatermark};

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    node_id: String,
    channel_name: String,
    last_seen: DateTime<Utc>,
}

/// PostgreSQL-backed [`MembershipStore`].
#[derive(Debug, Clone)]
pub struct MembershipRepository {
    pool: PgPool,
}

impl MembershipRepository {
    /// Create a new membership repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for MembershipRepository {
    async fn heartbeat(&self, membership: &NodeMembership) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO node_membership (node_id, channel_name, last_seen) VALUES ($1, $2, $3) \
             ON CONFLICT (node_id) DO UPDATE SET channel_name = EXCLUDED.channel_name, \
             last_seen = EXCLUDED.last_seen",
        )
        .bind(membership.node_id.as_str())
        .bind(&membership.channel_name)
        .bind(membership.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert membership", e))?;
        Ok(())
    }

    async fn record_watermarks(
        &self,
        node_id: &NodeId,
        watermarks: &[TopicWatermark],
    ) -> AppResult<()> {
        let topics: Vec<String> = watermarks.iter().map(|w| w.topic.clone()).collect();
        let sequences: Vec<i64> = watermarks.iter().map(|w| w.sequence as i64).collect();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin watermark transaction", e)
        })?;

        // Topics this node stopped tracking must not hold back eviction.
        sqlx::query("DELETE FROM node_watermarks WHERE node_id = $1 AND NOT (topic = ANY($2))")
            .bind(node_id.as_str())
            .bind(&topics)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to prune watermarks", e)
            })?;

        sqlx::query(
            "INSERT INTO node_watermarks (node_id, topic, sequence, updated_at) \
             SELECT $1, t, s, NOW() FROM UNNEST($2::text[], $3::bigint[]) AS u(t, s) \
             ON CONFLICT (node_id, topic) DO UPDATE SET \
             sequence = GREATEST(node_watermarks.sequence, EXCLUDED.sequence), updated_at = NOW()",
        )
        .bind(node_id.as_str())
        .bind(&topics)
        .bind(&sequences)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to record watermarks", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit watermarks", e)
        })?;
        Ok(())
    }

    async fn live_nodes(&self, since: DateTime<Utc>) -> AppResult<Vec<NodeMembership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            "SELECT node_id, channel_name, last_seen FROM node_membership \
             WHERE last_seen >= $1 ORDER BY node_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list live nodes", e))?;

        Ok(rows
            .into_iter()
            .map(|row| NodeMembership {
                node_id: NodeId::new(row.node_id),
                channel_name: row.channel_name,
                last_seen: row.last_seen,
            })
            .collect())
    }
}
