//! # Work Queue Contract
//!
//! Durable at-least-once channel between the roles of one stage. A received message stays
//! invisible for the visibility timeout; if it is not acked by then it is delivered again
//! with a higher read count. There is no ordering across documents.

use super::errors::{MessagingError, MessagingResult};
use super::message::StageMessage;
use crate::config::QueueConfig;
use crate::state_machine::{Stage, STAGE_SEQUENCE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A message handed out by `receive`, still owned by the queue until acked
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg_id: i64,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub payload: Value,
}

impl QueuedMessage {
    pub fn decode(&self) -> MessagingResult<StageMessage> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Enqueue a message; returns its queue id
    async fn send(&self, message: &StageMessage) -> MessagingResult<i64>;

    /// Receive up to `limit` visible messages, hiding them for `visibility_timeout`
    async fn receive(
        &self,
        limit: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<QueuedMessage>>;

    /// Remove a received message; `false` when it was already gone
    async fn ack(&self, msg_id: i64) -> MessagingResult<bool>;

    /// Drop every message; returns how many were removed
    async fn purge(&self) -> MessagingResult<u64>;

    /// Wait until a message may be available or `timeout` passes
    async fn wait_for_messages(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// One queue per processing stage
#[derive(Debug, Clone)]
pub struct QueueRegistry {
    queues: HashMap<Stage, Arc<dyn WorkQueue>>,
}

impl QueueRegistry {
    /// Build a queue for every processing stage, named `{prefix}_queue_{stage}`
    pub fn build<F>(prefix: &str, mut factory: F) -> Self
    where
        F: FnMut(String) -> Arc<dyn WorkQueue>,
    {
        let queues = STAGE_SEQUENCE
            .iter()
            .map(|stage| (*stage, factory(QueueConfig::queue_name(prefix, *stage))))
            .collect();
        Self { queues }
    }

    pub fn get(&self, stage: Stage) -> MessagingResult<&Arc<dyn WorkQueue>> {
        self.queues
            .get(&stage)
            .ok_or_else(|| MessagingError::queue_not_found(format!("{stage} stage queue")))
    }

    /// Stamp and enqueue a message on the queue of its stage
    pub async fn send(&self, message: StageMessage) -> MessagingResult<i64> {
        let queue = self.get(message.stage)?;
        queue.send(&message.stamped()).await
    }

    pub fn stages(&self) -> impl Iterator<Item = (Stage, &Arc<dyn WorkQueue>)> {
        STAGE_SEQUENCE
            .iter()
            .filter_map(|stage| self.queues.get(stage).map(|queue| (*stage, queue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryWorkQueue;

    #[tokio::test]
    async fn test_registry_routes_by_stage() {
        let registry = QueueRegistry::build("docpipe", |name| {
            Arc::new(InMemoryWorkQueue::new(name)) as Arc<dyn WorkQueue>
        });
        assert_eq!(registry.stages().count(), 6);
        assert!(registry.get(Stage::Acquire).is_err());

        registry
            .send(StageMessage::begin("001", Stage::Reshape))
            .await
            .unwrap();

        let reshape = registry.get(Stage::Reshape).unwrap();
        assert_eq!(reshape.name(), "docpipe_queue_reshape");
        let received = reshape
            .receive(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].decode().unwrap().document_id, "001");
    }
}
