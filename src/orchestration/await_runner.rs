//! # Await Runner
//!
//! Consumes `Actor` and `Review` messages. A PASS merges the stage map and promotes the
//! document; a FAIL breaks it up. Augment is the one stage an actor result does not finish:
//! the review request is merged and the document waits for the reviewer.
//!
//! Messages for a document that already left the stage are dropped, which is what makes
//! redelivered and duplicate results harmless.

use super::manager::ControlPlaneManager;
use crate::error::{PipelineError, Result};
use crate::logging::log_stage_operation;
use crate::messaging::{Aspect, StageMessage};
use crate::models::{DocumentRecord, StageMapUpdate};
use crate::state_machine::{Stage, StageState};
use crate::tracking::{TrackingError, TrackingStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What the await runner did with a completion message
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    /// Document moved on to this state
    Promoted(StageState),
    /// Review was requested; the document waits in augment
    AwaitingReview,
    /// Document was broken up with this reason
    Failed(String),
    /// Message no longer applies and can be acknowledged
    Dropped(String),
    /// Message arrived before the state it refers to; leave it for redelivery
    Deferred(String),
}

impl AwaitOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Deferred(_))
    }
}

#[derive(Debug, Clone)]
pub struct AwaitRunner {
    store: Arc<dyn TrackingStore>,
    manager: Arc<ControlPlaneManager>,
}

impl AwaitRunner {
    pub fn new(store: Arc<dyn TrackingStore>, manager: Arc<ControlPlaneManager>) -> Self {
        Self { store, manager }
    }

    #[instrument(skip(self, message), fields(document_id = %message.document_id, stage = %message.stage, aspect = %message.aspect))]
    pub async fn handle(&self, message: &StageMessage) -> Result<AwaitOutcome> {
        if !message.aspect.is_completion() {
            return Err(PipelineError::orchestration(format!(
                "await runner cannot handle {} messages",
                message.aspect
            )));
        }
        let stage = message.stage;

        let Some(record) = self.store.get(&message.document_id).await? else {
            return Ok(self.drop_message("document is not tracked"));
        };
        if !record.is_at(stage) {
            return Ok(self.drop_message(&format!("document is {}", record.stage_state)));
        }

        if message.aspect == Aspect::Review {
            if let Some(outcome) = self.check_review_loop(&record, message) {
                return Ok(outcome);
            }
        }

        if !message.is_pass() {
            return self.fail(&message.document_id, stage, &message.failure_description()).await;
        }

        let update = match &message.map_updates {
            Some(update) if update.stage() == stage => update,
            Some(update) => {
                let reason = format!("{stage} result carried a {} map update", update.stage());
                return self.fail(&message.document_id, stage, &reason).await;
            }
            None => {
                let reason = format!("{stage} result carried no map update");
                return self.fail(&message.document_id, stage, &reason).await;
            }
        };

        let merged = match self.store.merge_stage_map(&message.document_id, update).await {
            Ok(merged) => merged,
            Err(TrackingError::InvalidUpdate(e)) => {
                return self.fail(&message.document_id, stage, &e.to_string()).await;
            }
            // Another result for this stage promoted or failed the document first
            Err(TrackingError::StaleState { actual, .. }) => {
                return Ok(self.drop_message(&format!("document is {actual}")));
            }
            Err(e) => return Err(e.into()),
        };
        log_stage_operation(
            "await",
            &message.document_id,
            stage.as_str(),
            Some(message.aspect.as_str()),
            "merged",
            None,
        );

        if stage == Stage::Augment && message.aspect == Aspect::Actor {
            info!(
                review_loop_id = ?merged.maps.augment.as_ref().and_then(|a| a.review_loop_id.as_deref()),
                "⏸️ Waiting for human review"
            );
            return Ok(AwaitOutcome::AwaitingReview);
        }

        let promoted = self.manager.promote_from(&message.document_id, stage).await?;
        Ok(AwaitOutcome::Promoted(promoted.stage_state))
    }

    /// Review completions only count for the loop this visit to augment started
    fn check_review_loop(
        &self,
        record: &DocumentRecord,
        message: &StageMessage,
    ) -> Option<AwaitOutcome> {
        let recorded = record
            .maps
            .augment
            .as_ref()
            .and_then(|augment| augment.review_loop_id.as_deref());
        let incoming = match &message.map_updates {
            Some(StageMapUpdate::Augment(augment)) => augment.review_loop_id.as_deref(),
            _ => None,
        };

        match (recorded, incoming) {
            (None, _) => {
                debug!("Review completion arrived before the review request was recorded");
                Some(AwaitOutcome::Deferred(
                    "review loop not recorded yet".to_string(),
                ))
            }
            (Some(recorded), Some(incoming)) if recorded == incoming => None,
            (Some(recorded), incoming) => Some(self.drop_message(&format!(
                "review loop {} does not match recorded loop {recorded}",
                incoming.unwrap_or("<none>")
            ))),
        }
    }

    async fn fail(&self, document_id: &str, stage: Stage, reason: &str) -> Result<AwaitOutcome> {
        self.manager.breakup_from(document_id, stage, reason).await?;
        Ok(AwaitOutcome::Failed(reason.to_string()))
    }

    fn drop_message(&self, reason: &str) -> AwaitOutcome {
        warn!(reason = %reason, "🗑️ Dropping stale stage message");
        AwaitOutcome::Dropped(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_deferred_is_left_on_the_queue() {
        assert!(AwaitOutcome::Promoted(StageState::Extract).should_ack());
        assert!(AwaitOutcome::Dropped("stale".into()).should_ack());
        assert!(AwaitOutcome::Failed("bad".into()).should_ack());
        assert!(!AwaitOutcome::Deferred("early".into()).should_ack());
    }
}
