//! In-process work queue with visibility timeouts, used by tests and single-node runs.

use super::errors::MessagingResult;
use super::message::StageMessage;
use super::queue::{QueuedMessage, WorkQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    msg_id: i64,
    read_count: i32,
    enqueued_at: DateTime<Utc>,
    payload: Value,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    ready: VecDeque<Entry>,
    in_flight: HashMap<i64, (Entry, Instant)>,
}

impl QueueState {
    /// Move in-flight messages whose visibility timeout has passed back to the ready list
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }
        for id in expired {
            if let Some((entry, _)) = self.in_flight.remove(&id) {
                self.ready.push_back(entry);
            }
        }
        self.ready.make_contiguous().sort_by_key(|entry| entry.msg_id);
    }
}

#[derive(Debug)]
pub struct InMemoryWorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Visible plus in-flight messages
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every in-flight message visible again, as if its timeout had expired
    pub fn expire_in_flight(&self) {
        let mut state = self.state.lock();
        let far_future = Instant::now() + Duration::from_secs(365 * 24 * 3600);
        state.release_expired(far_future);
        drop(state);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &StageMessage) -> MessagingResult<i64> {
        let payload = serde_json::to_value(message)?;
        let msg_id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let msg_id = state.next_id;
            state.ready.push_back(Entry {
                msg_id,
                read_count: 0,
                enqueued_at: Utc::now(),
                payload,
            });
            msg_id
        };
        self.notify.notify_one();
        Ok(msg_id)
    }

    async fn receive(
        &self,
        limit: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<QueuedMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.release_expired(now);

        let mut received = Vec::with_capacity(limit.min(state.ready.len()));
        while received.len() < limit {
            let Some(mut entry) = state.ready.pop_front() else {
                break;
            };
            entry.read_count += 1;
            received.push(QueuedMessage {
                msg_id: entry.msg_id,
                read_count: entry.read_count,
                enqueued_at: entry.enqueued_at,
                payload: entry.payload.clone(),
            });
            state
                .in_flight
                .insert(entry.msg_id, (entry, now + visibility_timeout));
        }
        Ok(received)
    }

    async fn ack(&self, msg_id: i64) -> MessagingResult<bool> {
        let mut state = self.state.lock();
        if state.in_flight.remove(&msg_id).is_some() {
            return Ok(true);
        }
        let before = state.ready.len();
        state.ready.retain(|entry| entry.msg_id != msg_id);
        Ok(state.ready.len() != before)
    }

    async fn purge(&self) -> MessagingResult<u64> {
        let mut state = self.state.lock();
        let count = state.ready.len() + state.in_flight.len();
        state.ready.clear();
        state.in_flight.clear();
        Ok(count as u64)
    }

    async fn wait_for_messages(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Stage;

    fn queue() -> InMemoryWorkQueue {
        InMemoryWorkQueue::new("docpipe_queue_classify")
    }

    #[tokio::test]
    async fn test_received_message_is_hidden_until_acked() {
        let queue = queue();
        queue
            .send(&StageMessage::begin("001", Stage::Classify))
            .await
            .unwrap();

        let first = queue.receive(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(10, Duration::from_secs(60)).await.unwrap().is_empty());

        assert!(queue.ack(first[0].msg_id).await.unwrap());
        assert!(!queue.ack(first[0].msg_id).await.unwrap());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered_after_timeout() {
        let queue = queue();
        queue
            .send(&StageMessage::begin("001", Stage::Classify))
            .await
            .unwrap();

        let first = queue.receive(1, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first[0].read_count, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue.receive(1, Duration::from_secs(30)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].msg_id, first[0].msg_id);
        assert_eq!(again[0].read_count, 2);
    }

    #[tokio::test]
    async fn test_receive_respects_limit_and_purge_clears() {
        let queue = queue();
        for id in ["001", "002", "003"] {
            queue
                .send(&StageMessage::begin(id, Stage::Classify))
                .await
                .unwrap();
        }
        let batch = queue.receive(2, Duration::from_secs(30)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.purge().await.unwrap(), 3);
        assert!(queue.is_empty());
    }
}
