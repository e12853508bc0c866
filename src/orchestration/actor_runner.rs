//! # Actor Runner
//!
//! Consumes `Begin` messages. The runner loads the record, runs the stage actor and reports
//! the outcome on the same stage queue as an `Actor` message. It never changes the tracking
//! state itself.
//!
//! Any error or panic inside the actor becomes a FAIL grade carrying the reason.

use crate::actors::{ActorContext, ActorServices, StageActor};
use crate::error::{PipelineError, Result};
use crate::logging::log_stage_operation;
use crate::messaging::{QueueRegistry, StageMessage};
use crate::state_machine::Stage;
use crate::tracking::TrackingStore;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What the runner did with a `Begin` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Result was enqueued under this queue id
    Sent { msg_id: i64, passed: bool },
    /// Document no longer waits on this stage's actor
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ActorRunner {
    store: Arc<dyn TrackingStore>,
    queues: Arc<QueueRegistry>,
    actors: HashMap<Stage, Arc<dyn StageActor>>,
    services: Arc<ActorServices>,
}

impl ActorRunner {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        queues: Arc<QueueRegistry>,
        actors: Vec<Arc<dyn StageActor>>,
        services: Arc<ActorServices>,
    ) -> Self {
        let actors = actors
            .into_iter()
            .map(|actor| (actor.stage(), actor))
            .collect();
        Self {
            store,
            queues,
            actors,
            services,
        }
    }

    pub fn has_actor(&self, stage: Stage) -> bool {
        self.actors.contains_key(&stage)
    }

    #[instrument(skip(self, message), fields(document_id = %message.document_id, stage = %message.stage))]
    pub async fn run(&self, message: &StageMessage) -> Result<ActorOutcome> {
        let stage = message.stage;
        let actor = self.actors.get(&stage).cloned().ok_or_else(|| {
            PipelineError::orchestration(format!("no actor registered for stage {stage}"))
        })?;

        let Some(record) = self.store.get(&message.document_id).await? else {
            warn!("Begin message for an untracked document, skipping");
            return Ok(ActorOutcome::Skipped);
        };
        if !record.is_at(stage) {
            debug!(state = %record.stage_state, "Document left the stage, skipping actor");
            return Ok(ActorOutcome::Skipped);
        }

        log_stage_operation("act", &message.document_id, stage.as_str(), Some("begin"), "started", None);

        let mut ctx = ActorContext::new(record, Arc::clone(&self.services));
        let result = AssertUnwindSafe(actor.act(&mut ctx)).catch_unwind().await;

        let reply = match result {
            Ok(Ok(update)) => {
                info!("✅ Actor passed");
                StageMessage::actor_pass(&message.document_id, stage, update)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "❌ Actor failed");
                StageMessage::actor_fail(&message.document_id, stage, e.to_string())
            }
            Err(panic) => {
                let reason = format!("{stage} actor panicked: {}", panic_message(panic.as_ref()));
                error!(reason = %reason, "💥 Actor panicked");
                StageMessage::actor_fail(&message.document_id, stage, reason)
            }
        };

        let passed = reply.is_pass();
        let msg_id = self.queues.send(reply).await?;
        log_stage_operation(
            "act",
            &message.document_id,
            stage.as_str(),
            Some("actor"),
            if passed { "pass" } else { "fail" },
            None,
        );
        Ok(ActorOutcome::Sent { msg_id, passed })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
