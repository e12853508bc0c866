//! # Intake Trigger
//!
//! Starts a document when its source object lands under the intake prefix of the document
//! bucket. The document id is the object's file stem, so re-uploading the same file maps to
//! the same document and the repeated startup is a no-op.

use super::manager::ControlPlaneManager;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{AcquireMap, DocumentRecord, ObjectLocator};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Object-created notification from the document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreatedEvent {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct IntakeTrigger {
    manager: Arc<ControlPlaneManager>,
    bucket: String,
    intake_prefix: String,
}

impl IntakeTrigger {
    pub fn new(manager: Arc<ControlPlaneManager>, store: &StoreConfig) -> Self {
        Self {
            manager,
            bucket: store.document_bucket.clone(),
            intake_prefix: store.intake_prefix.clone(),
        }
    }

    /// Start the document for an intake object; `None` when the event is not an intake
    #[instrument(skip(self))]
    pub async fn handle(&self, event: ObjectCreatedEvent) -> Result<Option<DocumentRecord>> {
        if event.bucket != self.bucket || !event.key.starts_with(&self.intake_prefix) {
            debug!(bucket = %event.bucket, key = %event.key, "Object is not an intake upload");
            return Ok(None);
        }

        let input = ObjectLocator::new(event.bucket, event.key);
        let Some(document_id) = input.file_stem().map(str::to_string) else {
            debug!(input = %input, "Intake object has no usable name");
            return Ok(None);
        };

        info!(document_id = %document_id, input = %input, "📥 Intake object received");
        let acquire = AcquireMap {
            input: Some(input),
            received_at: Some(Utc::now()),
        };
        self.manager.startup(&document_id, acquire).await.map(Some)
    }
}
