//! # Stage Actors
//!
//! The business work of each processing stage. An actor reads the document record it is
//! handed, does its work against the external services, writes any large output to the
//! object store, and returns the partial map update for its stage.
//!
//! ## Overview
//!
//! Actors never touch the tracking store or the queues. Every error they return is a
//! business failure: the actor runner turns it into a FAIL grade, and the await runner
//! turns that into `breakup`.

pub mod augment;
pub mod catalog;
pub mod classify;
pub mod extract;
pub mod operate;
pub mod reshape;

use crate::config::PipelineConfig;
use crate::models::{DocumentRecord, ObjectLocator, StageMapUpdate};
use crate::services::{
    HumanReviewService, InferenceError, InferenceService, ObjectStore, ReviewError,
    ReviewWorkflowRegistry, StoreError,
};
use crate::state_machine::Stage;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use augment::{review_loop_name, AugmentActor};
pub use catalog::CatalogActor;
pub use classify::ClassifyActor;
pub use extract::ExtractActor;
pub use operate::{convert_to_review_document, OperateActor};
pub use reshape::ReshapeActor;

/// Why a stage actor could not produce its result
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Document rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Review(#[from] ReviewError),
}

impl ActorError {
    pub fn missing_input(what: impl Into<String>) -> Self {
        Self::MissingInput(what.into())
    }

    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput(reason.into())
    }
}

/// Settings the actors read from the pipeline configuration
#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub prefix: String,
    pub document_bucket: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&PipelineConfig> for ActorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            prefix: config.pipeline.prefix.clone(),
            document_bucket: config.store.document_bucket.clone(),
            model_id: config.inference.model_id.clone(),
            max_tokens: config.inference.max_tokens,
            temperature: config.inference.temperature,
        }
    }
}

/// Shared handles the actors work with
#[derive(Debug, Clone)]
pub struct ActorServices {
    pub settings: ActorSettings,
    pub object_store: Arc<dyn ObjectStore>,
    pub inference: Arc<dyn InferenceService>,
    pub review: Arc<dyn HumanReviewService>,
    pub review_workflows: ReviewWorkflowRegistry,
}

impl ActorServices {
    pub fn new(
        config: &PipelineConfig,
        object_store: Arc<dyn ObjectStore>,
        inference: Arc<dyn InferenceService>,
        review: Arc<dyn HumanReviewService>,
    ) -> Self {
        Self {
            settings: ActorSettings::from(config),
            object_store,
            inference,
            review,
            review_workflows: ReviewWorkflowRegistry::from_config(&config.review),
        }
    }
}

/// Everything one actor invocation sees
#[derive(Debug)]
pub struct ActorContext {
    pub record: DocumentRecord,
    services: Arc<ActorServices>,
}

impl ActorContext {
    pub fn new(record: DocumentRecord, services: Arc<ActorServices>) -> Self {
        Self { record, services }
    }

    pub fn document_id(&self) -> &str {
        &self.record.document_id
    }

    pub fn services(&self) -> &ActorServices {
        &self.services
    }

    pub fn settings(&self) -> &ActorSettings {
        &self.services.settings
    }

    /// Locator in the document bucket
    pub fn locator(&self, key: impl Into<String>) -> ObjectLocator {
        ObjectLocator::new(self.services.settings.document_bucket.clone(), key)
    }

    /// Record scratch data for the running stage
    pub fn note(&mut self, key: &str, value: Value) {
        self.record.current_map.insert(key, value);
    }

    /// The intake object the document was started from
    pub fn intake_input(&self) -> Result<ObjectLocator, ActorError> {
        self.record
            .maps
            .acquire
            .as_ref()
            .and_then(|acquire| acquire.input.clone())
            .ok_or_else(|| ActorError::missing_input("acquire input locator"))
    }
}

#[async_trait]
pub trait StageActor: Send + Sync + fmt::Debug {
    fn stage(&self) -> Stage;

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError>;
}

/// One actor per processing stage
pub fn default_actors() -> Vec<Arc<dyn StageActor>> {
    vec![
        Arc::new(ClassifyActor),
        Arc::new(ExtractActor),
        Arc::new(OperateActor),
        Arc::new(ReshapeActor),
        Arc::new(AugmentActor),
        Arc::new(CatalogActor),
    ]
}

/// Media type of an intake object, from its extension
pub(crate) fn media_type(locator: &ObjectLocator) -> &'static str {
    let extension = locator
        .key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Text of a JSON scalar as shown to a reviewer
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
