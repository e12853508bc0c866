//! # Begin Runner
//!
//! Enters a stage and asks its actor to run. No business logic: the runner moves the record
//! into the stage with a compare-and-set, re-stamps it, resets the current map, then puts a
//! `Begin` message on the stage queue.
//!
//! If the process dies between the state change and the enqueue, the document sits in the
//! stage with nothing in flight until checkup re-drives it.

use crate::error::{PipelineError, Result};
use crate::messaging::{QueueRegistry, StageMessage};
use crate::models::{DocumentRecord, StateTransition};
use crate::state_machine::{Stage, StageState};
use crate::tracking::TrackingStore;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct BeginRunner {
    store: Arc<dyn TrackingStore>,
    queues: Arc<QueueRegistry>,
}

impl BeginRunner {
    pub fn new(store: Arc<dyn TrackingStore>, queues: Arc<QueueRegistry>) -> Self {
        Self { store, queues }
    }

    /// Move the document from `from` into `stage` and request the stage actor
    #[instrument(skip(self))]
    pub async fn begin(
        &self,
        document_id: &str,
        from: StageState,
        stage: Stage,
    ) -> Result<DocumentRecord> {
        self.begin_with(document_id, StateTransition::begin(from, stage))
            .await
    }

    /// Apply a prepared transition into a processing stage and request the stage actor
    pub async fn begin_with(
        &self,
        document_id: &str,
        transition: StateTransition,
    ) -> Result<DocumentRecord> {
        let stage = transition
            .target
            .stage()
            .filter(Stage::is_processing)
            .ok_or_else(|| {
                PipelineError::orchestration(format!(
                    "cannot begin non-processing state {}",
                    transition.target
                ))
            })?;

        let record = self.store.transition(document_id, &transition).await?;
        let msg_id = self
            .queues
            .send(StageMessage::begin(document_id, stage))
            .await?;

        info!(
            document_id = %document_id,
            stage = %stage,
            msg_id,
            order_stamp = %record.order_stamp,
            "🚀 Stage begun"
        );
        Ok(record)
    }

    /// Re-request the actor of the stage the document is currently in
    #[instrument(skip(self))]
    pub async fn rebegin(&self, document_id: &str) -> Result<DocumentRecord> {
        let record = self.store.require(document_id).await?;
        let stage = record
            .current_stage()
            .filter(Stage::is_processing)
            .ok_or_else(|| {
                PipelineError::orchestration(format!(
                    "document {document_id} is {} and has no stage to re-begin",
                    record.stage_state
                ))
            })?;
        self.begin(document_id, record.stage_state, stage).await
    }
}
