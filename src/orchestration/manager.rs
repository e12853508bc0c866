//! # Control-Plane Manager
//!
//! Document lifecycle operations: startup, promote, breakup, restart and checkup (see
//! `checkup.rs`). Every operation re-reads the record, decides through the document state
//! machine, and commits with a compare-and-set, so concurrent duplicates collapse into one
//! effective change.

use super::begin::BeginRunner;
use super::checkup::CheckupPolicy;
use crate::error::{PipelineError, Result};
use crate::logging::log_document_operation;
use crate::models::{AcquireMap, DocumentRecord, FailureInfo, StateTransition};
use crate::state_machine::{DocumentEvent, DocumentStateMachine, Stage, StageState};
use crate::tracking::{TrackingError, TrackingStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const BREAKUP_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ControlPlaneManager {
    pub(crate) store: Arc<dyn TrackingStore>,
    pub(crate) begin: BeginRunner,
    pub(crate) policy: CheckupPolicy,
}

impl ControlPlaneManager {
    pub fn new(store: Arc<dyn TrackingStore>, begin: BeginRunner, policy: CheckupPolicy) -> Self {
        Self {
            store,
            begin,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    pub fn policy(&self) -> &CheckupPolicy {
        &self.policy
    }

    /// Create the tracking record and begin the first processing stage.
    ///
    /// A document that is already tracked is left alone, so a repeated intake event is a
    /// no-op.
    #[instrument(skip(self, acquire))]
    pub async fn startup(&self, document_id: &str, acquire: AcquireMap) -> Result<DocumentRecord> {
        let record = DocumentRecord::new(document_id, acquire);
        if !self.store.create(&record).await? {
            info!(document_id = %document_id, "Document already tracked, startup skipped");
            return Ok(self.store.require(document_id).await?);
        }

        log_document_operation("startup", document_id, Some("acquire"), "created", None);
        self.promote_from(document_id, Stage::Acquire).await
    }

    /// Advance the document to its next stage, or to `Complete` after the last one.
    /// Terminal documents are left unchanged.
    #[instrument(skip(self))]
    pub async fn promote(&self, document_id: &str) -> Result<DocumentRecord> {
        let record = self.store.require(document_id).await?;
        self.promote_record(record).await
    }

    /// Promote only if the document is still in `expected`; otherwise return it unchanged
    #[instrument(skip(self))]
    pub async fn promote_from(&self, document_id: &str, expected: Stage) -> Result<DocumentRecord> {
        let record = self.store.require(document_id).await?;
        if !record.is_at(expected) {
            debug!(
                document_id = %document_id,
                expected = %expected,
                actual = %record.stage_state,
                "Document already moved on, promote skipped"
            );
            return Ok(record);
        }
        self.promote_record(record).await
    }

    async fn promote_record(&self, record: DocumentRecord) -> Result<DocumentRecord> {
        let document_id = record.document_id.clone();
        let machine = DocumentStateMachine::for_record(&record);
        let current = record.stage_state;

        let Some(stage) = current.stage() else {
            debug!(document_id = %document_id, state = %current, "Terminal document, promote is a no-op");
            return Ok(record);
        };

        let outcome: Result<DocumentRecord> = match stage.next() {
            None => {
                machine.determine_target_state(&DocumentEvent::Complete)?;
                self.store
                    .transition(&document_id, &StateTransition::complete(current))
                    .await
                    .map_err(Into::into)
            }
            Some(next) => {
                machine.determine_target_state(&DocumentEvent::Begin(next))?;
                self.begin.begin(&document_id, current, next).await
            }
        };

        match outcome {
            Ok(updated) => {
                log_document_operation(
                    "promote",
                    &document_id,
                    Some(updated.stage_state.as_str()),
                    "advanced",
                    Some(current.as_str()),
                );
                Ok(updated)
            }
            Err(PipelineError::Tracking(TrackingError::StaleState { actual, .. })) => {
                debug!(
                    document_id = %document_id,
                    from = %current,
                    actual = %actual,
                    "Concurrent promote won the race"
                );
                Ok(self.store.require(&document_id).await?)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the document failed with `reason`. Failed and complete documents are left
    /// unchanged; maps are never removed.
    #[instrument(skip(self))]
    pub async fn breakup(&self, document_id: &str, reason: &str) -> Result<DocumentRecord> {
        for _ in 0..BREAKUP_ATTEMPTS {
            let record = self.store.require(document_id).await?;
            match self.fail_record(&record, reason).await {
                Err(TrackingError::StaleState { .. }) => continue,
                other => return Ok(other?),
            }
        }
        Ok(self.store.require(document_id).await?)
    }

    /// Fail the document only while it is still in `stage`
    #[instrument(skip(self))]
    pub async fn breakup_from(
        &self,
        document_id: &str,
        stage: Stage,
        reason: &str,
    ) -> Result<DocumentRecord> {
        let record = self.store.require(document_id).await?;
        if !record.is_at(stage) {
            debug!(document_id = %document_id, stage = %stage, "Document left the stage, breakup skipped");
            return Ok(record);
        }
        match self.fail_record(&record, reason).await {
            Err(TrackingError::StaleState { .. }) => Ok(self.store.require(document_id).await?),
            other => Ok(other?),
        }
    }

    async fn fail_record(
        &self,
        record: &DocumentRecord,
        reason: &str,
    ) -> std::result::Result<DocumentRecord, TrackingError> {
        let Some(failed_stage) = record.current_stage() else {
            debug!(document_id = %record.document_id, state = %record.stage_state, "Terminal document, breakup is a no-op");
            return Ok(record.clone());
        };

        let failure = FailureInfo {
            reason: reason.to_string(),
            failed_stage,
            failed_at: Utc::now(),
        };
        let failed = self
            .store
            .transition(
                &record.document_id,
                &StateTransition::fail(record.stage_state, failure),
            )
            .await?;

        warn!(
            document_id = %record.document_id,
            failed_stage = %failed_stage,
            reason = %reason,
            "💥 Document failed"
        );
        log_document_operation(
            "breakup",
            &record.document_id,
            Some(StageState::Failed.as_str()),
            "failed",
            Some(reason),
        );
        Ok(failed)
    }

    /// Re-run the document from `from_stage`: clear that stage's map and every later one,
    /// clear the failure, re-stamp and begin the stage.
    ///
    /// Only stages the document has already reached can be restarted.
    #[instrument(skip(self))]
    pub async fn restart(&self, document_id: &str, from_stage: Stage) -> Result<DocumentRecord> {
        let record = self.store.require(document_id).await?;
        let machine = DocumentStateMachine::for_record(&record);
        machine.determine_target_state(&DocumentEvent::Restart(from_stage))?;

        let transition = StateTransition::restart(record.stage_state, from_stage);
        let restarted = self.begin.begin_with(document_id, transition).await?;

        log_document_operation(
            "restart",
            document_id,
            Some(restarted.stage_state.as_str()),
            "restarted",
            Some(record.stage_state.as_str()),
        );
        Ok(restarted)
    }
}
