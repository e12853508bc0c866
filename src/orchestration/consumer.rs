//! # Stage Consumer
//!
//! Drains one stage queue. `Begin` messages go to the actor runner; `Actor` and `Review`
//! messages go to the await runner. A batch is processed concurrently and each message is
//! acked once it has been handled.
//!
//! Messages are left on the queue (and come back after the visibility timeout) when the
//! handler hit an infrastructure error or deferred the message.

use super::actor_runner::ActorRunner;
use super::await_runner::AwaitRunner;
use crate::config::QueueConfig;
use crate::error::{PipelineError, Result};
use crate::logging::log_error;
use crate::messaging::{Aspect, MessagingError, QueuedMessage, WorkQueue};
use crate::state_machine::Stage;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    Deferred,
    /// Transient failure; wait for redelivery
    Retry,
    /// Permanent failure; acked so it does not loop forever
    Discarded,
    Poison,
}

impl Disposition {
    fn should_ack(self) -> bool {
        matches!(self, Self::Handled | Self::Discarded | Self::Poison)
    }
}

/// Counters for one `process_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub received: usize,
    pub acked: usize,
    pub deferred: usize,
    pub failed: usize,
    pub poisoned: usize,
}

#[derive(Debug, Clone)]
pub struct StageConsumer {
    stage: Stage,
    queue: Arc<dyn WorkQueue>,
    actor_runner: Arc<ActorRunner>,
    await_runner: Arc<AwaitRunner>,
    batch_size: usize,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl StageConsumer {
    pub fn new(
        stage: Stage,
        queue: Arc<dyn WorkQueue>,
        actor_runner: Arc<ActorRunner>,
        await_runner: Arc<AwaitRunner>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            stage,
            queue,
            actor_runner,
            await_runner,
            batch_size: config.batch_size,
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Receive and handle one batch
    #[instrument(skip(self), fields(stage = %self.stage))]
    pub async fn process_batch(&self) -> Result<BatchStats> {
        let messages = self
            .queue
            .receive(self.batch_size, self.visibility_timeout)
            .await?;

        let mut stats = BatchStats {
            received: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return Ok(stats);
        }
        debug!(count = messages.len(), queue = %self.queue.name(), "Processing stage batch");

        let dispositions = join_all(messages.iter().map(|queued| self.process_one(queued))).await;

        for (queued, disposition) in messages.iter().zip(dispositions) {
            match disposition {
                Disposition::Deferred => stats.deferred += 1,
                Disposition::Retry | Disposition::Discarded => stats.failed += 1,
                Disposition::Poison => stats.poisoned += 1,
                Disposition::Handled => {}
            }
            if !disposition.should_ack() {
                continue;
            }
            match self.queue.ack(queued.msg_id).await {
                Ok(_) => stats.acked += 1,
                Err(e) => warn!(
                    msg_id = queued.msg_id,
                    error = %e,
                    "Failed to ack handled message"
                ),
            }
        }

        if stats.acked > 0 {
            info!(
                stage = %self.stage,
                received = stats.received,
                acked = stats.acked,
                deferred = stats.deferred,
                failed = stats.failed,
                "Completed stage batch"
            );
        }
        Ok(stats)
    }

    async fn process_one(&self, queued: &QueuedMessage) -> Disposition {
        let message = match queued.decode() {
            Ok(message) => message,
            Err(e) => {
                let disposition = decode_failure(&e);
                if disposition == Disposition::Poison {
                    error!(
                        msg_id = queued.msg_id,
                        read_count = queued.read_count,
                        error = %e,
                        "☠️ Undecodable stage message"
                    );
                } else {
                    warn!(msg_id = queued.msg_id, error = %e, "Stage message could not be read");
                }
                return disposition;
            }
        };

        if message.stage != self.stage {
            error!(
                msg_id = queued.msg_id,
                document_id = %message.document_id,
                message_stage = %message.stage,
                "Message on the wrong stage queue"
            );
            return Disposition::Discarded;
        }

        let handled: Result<bool> = match message.aspect {
            Aspect::Begin => self.actor_runner.run(&message).await.map(|_| true),
            Aspect::Actor | Aspect::Review => self
                .await_runner
                .handle(&message)
                .await
                .map(|outcome| outcome.should_ack()),
        };

        match handled {
            Ok(true) => Disposition::Handled,
            Ok(false) => Disposition::Deferred,
            Err(e) => self.classify_error(queued, &message.document_id, e),
        }
    }

    fn classify_error(&self, queued: &QueuedMessage, document_id: &str, e: PipelineError) -> Disposition {
        let context = format!("document {document_id}, msg {}", queued.msg_id);
        log_error("stage_consumer", self.stage.as_str(), &e.to_string(), Some(&context));
        if e.is_transient() {
            Disposition::Retry
        } else {
            Disposition::Discarded
        }
    }

    /// Poll until the shutdown signal flips to `true`
    #[instrument(skip(self, shutdown), fields(stage = %self.stage))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting stage consumer"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_batch().await {
                Ok(stats) => stats.received == 0,
                Err(e) => {
                    error!(error = %e, "Error in stage batch");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                _ = self.queue.wait_for_messages(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Stage consumer stopped");
    }
}

/// A payload that can never decode is acked away; anything else waits for redelivery
fn decode_failure(e: &MessagingError) -> Disposition {
    if e.is_poison() {
        Disposition::Poison
    } else {
        Disposition::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_ack_rules() {
        assert!(Disposition::Handled.should_ack());
        assert!(Disposition::Poison.should_ack());
        assert!(Disposition::Discarded.should_ack());
        assert!(!Disposition::Deferred.should_ack());
        assert!(!Disposition::Retry.should_ack());
    }

    #[test]
    fn test_undecodable_payload_is_poison() {
        let queued = QueuedMessage {
            msg_id: 7,
            read_count: 1,
            enqueued_at: Utc::now(),
            payload: json!({"document_id": 42, "aspect": "shrug"}),
        };
        let err = queued.decode().unwrap_err();
        assert_eq!(decode_failure(&err), Disposition::Poison);

        let missing = MessagingError::queue_not_found("docpipe_queue_extract");
        assert_eq!(decode_failure(&missing), Disposition::Retry);
    }
}
