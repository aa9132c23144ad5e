//! PostgreSQL queue implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use super::{Queue, QueueMessage, QueueType};
use crate::error::EngineResult;

/// Queue backed by the `queue` / `queue_ack_levels` tables.
///
/// Enqueue runs in a serializable transaction and locks the queue tail with
/// `FOR UPDATE`: two producers racing on the same queue type would otherwise
/// both read the same tail ID and collide on the primary key.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    queue_type: QueueType,
}

impl PostgresQueue {
    pub fn new(pool: PgPool, queue_type: QueueType) -> Self {
        Self { pool, queue_type }
    }
}

#[async_trait]
impl Queue for PostgresQueue {
    async fn enqueue_message(&self, payload: Vec<u8>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let last_message_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT message_id FROM queue
            WHERE queue_type = $1
            ORDER BY message_id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(self.queue_type as i32)
        .fetch_optional(&mut *tx)
        .await?;

        let message_id = last_message_id.unwrap_or(-1) + 1;
        sqlx::query(
            "INSERT INTO queue (queue_type, message_id, message_payload) VALUES ($1, $2, $3)",
        )
        .bind(self.queue_type as i32)
        .bind(message_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(queue_type = ?self.queue_type, message_id, "enqueued message");
        Ok(())
    }

    async fn read_messages(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> EngineResult<Vec<QueueMessage>> {
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT message_id, message_payload FROM queue
            WHERE queue_type = $1 AND message_id > $2
            ORDER BY message_id ASC
            LIMIT $3
            "#,
        )
        .bind(self.queue_type as i32)
        .bind(last_message_id)
        .bind(max_count as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, payload)| QueueMessage {
                queue_type: self.queue_type,
                id,
                payload,
            })
            .collect())
    }

    async fn delete_messages_before(&self, message_id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM queue WHERE queue_type = $1 AND message_id < $2")
            .bind(self.queue_type as i32)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_ack_level(&self, message_id: i64, cluster_name: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let existing: Option<Json<HashMap<String, i64>>> = sqlx::query_scalar(
            "SELECT ack_levels FROM queue_ack_levels WHERE queue_type = $1 FOR UPDATE",
        )
        .bind(self.queue_type as i32)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            None => {
                let levels = HashMap::from([(cluster_name.to_string(), message_id)]);
                sqlx::query(
                    "INSERT INTO queue_ack_levels (queue_type, ack_levels) VALUES ($1, $2)",
                )
                .bind(self.queue_type as i32)
                .bind(Json(levels))
                .execute(&mut *tx)
                .await?;
            }
            Some(Json(mut levels)) => {
                // ignore a possibly delayed message
                if levels.get(cluster_name).copied().unwrap_or(i64::MIN) > message_id {
                    tx.commit().await?;
                    return Ok(());
                }
                levels.insert(cluster_name.to_string(), message_id);
                sqlx::query("UPDATE queue_ack_levels SET ack_levels = $2 WHERE queue_type = $1")
                    .bind(self.queue_type as i32)
                    .bind(Json(levels))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_ack_levels(&self) -> EngineResult<HashMap<String, i64>> {
        let levels: Option<Json<HashMap<String, i64>>> =
            sqlx::query_scalar("SELECT ack_levels FROM queue_ack_levels WHERE queue_type = $1")
                .bind(self.queue_type as i32)
                .fetch_optional(&self.pool)
                .await?;
        Ok(levels.map(|Json(levels)| levels).unwrap_or_default())
    }
}
