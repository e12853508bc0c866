//! # PostgreSQL Message Queue (pgmq)
//!
//! Work queue backed by the `pgmq` extension, driven through plain SQL on a shared `sqlx`
//! pool.

use super::errors::{MessagingError, MessagingResult};
use super::message::StageMessage;
use super::queue::{QueuedMessage, WorkQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct PgmqWorkQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgmqWorkQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    /// Create the queue if it doesn't exist
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn ensure_created(&self) -> MessagingResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.queue_name, "create", e.to_string())
            })?;
        info!(queue = %self.queue_name, "✅ Queue ready");
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for PgmqWorkQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    #[instrument(skip(self, message), fields(queue = %self.queue_name, document_id = %message.document_id))]
    async fn send(&self, message: &StageMessage) -> MessagingResult<i64> {
        let payload = serde_json::to_value(message)?;
        let msg_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1, $2)")
            .bind(&self.queue_name)
            .bind(&payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(&self.queue_name, "send", e.to_string()))?;

        debug!(msg_id, aspect = %message.aspect, "✅ Message sent");
        Ok(msg_id)
    }

    async fn receive(
        &self,
        limit: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<QueuedMessage>> {
        let vt = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);
        let qty = i32::try_from(limit).unwrap_or(i32::MAX);

        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(&self.queue_name)
        .bind(vt)
        .bind(qty)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(&self.queue_name, "read", e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(QueuedMessage {
                msg_id: row.try_get::<i64, _>("msg_id")?,
                read_count: row.try_get::<i32, _>("read_ct")?,
                enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
                payload: row.try_get::<Value, _>("message")?,
            });
        }
        Ok(messages)
    }

    async fn ack(&self, msg_id: i64) -> MessagingResult<bool> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&self.queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.queue_name, "delete", e.to_string())
            })?;
        Ok(deleted)
    }

    async fn purge(&self) -> MessagingResult<u64> {
        let purged: i64 = sqlx::query_scalar("SELECT pgmq.purge_queue($1)")
            .bind(&self.queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.queue_name, "purge", e.to_string())
            })?;
        Ok(u64::try_from(purged).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Stage;

    async fn pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        PgPool::connect(&url).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL with the pgmq extension (DATABASE_URL)"]
    async fn test_pgmq_send_receive_ack() {
        let Some(pool) = pool().await else {
            return;
        };
        let queue = PgmqWorkQueue::new(pool, format!("docpipe_test_{}", std::process::id()));
        queue.ensure_created().await.unwrap();
        queue.purge().await.unwrap();

        let msg_id = queue
            .send(&StageMessage::begin("001", Stage::Extract))
            .await
            .unwrap();
        let received = queue.receive(5, Duration::from_secs(30)).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].msg_id, msg_id);
        assert_eq!(received[0].decode().unwrap().stage, Stage::Extract);
        assert!(queue.ack(msg_id).await.unwrap());
    }
}
