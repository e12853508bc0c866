//! Shared harness for the integration tests: scripted external services and an in-memory
//! pipeline that can be drained deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use docpipe::config::{PipelineConfig, ReviewWorkflowConfig};
use docpipe::models::{DocumentRecord, ObjectLocator, ReviewStatus};
use docpipe::orchestration::{
    ExternalServices, ObjectCreatedEvent, PipelineComponents, PipelineSystem,
    ReviewCompletionEvent,
};
use docpipe::services::{
    HumanReviewService, InMemoryObjectStore, InferenceError, InferenceRequest,
    InferenceResponse, InferenceService, ObjectStore, ReviewError, ReviewRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const WORKFLOW_ID: &str = "docpipe-augment-finance";
pub const BUCKET: &str = "docpipe-store-document";

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.review.workflows = vec![ReviewWorkflowConfig {
        team: "finance".to_string(),
        workflow_id: WORKFLOW_ID.to_string(),
    }];
    config.queues.visibility_timeout_seconds = 30;
    config.checkup.enabled = false;
    config
}

pub fn extraction_answer() -> Value {
    json!({
        "supplier": {"name": "Acme d.o.o.", "vat_id": "HR123"},
        "invoice_number": "INV-2024-001",
        "items": [
            {"description": "Widget", "quantity": 2, "price": 10.5},
            {"description": "Gadget", "quantity": 1, "price": 4.0}
        ],
        "total": 25.0,
        "notes": ["paid", "thank you"]
    })
}

/// Inference double that answers classification and extraction prompts
#[derive(Debug, Default)]
pub struct ScriptedInference {
    pub fail_extract: AtomicBool,
    pub not_financial: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn invoke(
        &self,
        _model_id: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if request.prompt.contains("Classify whether") {
            let answer = if self.not_financial.load(Ordering::SeqCst) {
                json!({"is_financial_document": false, "document_type": "", "language": "", "prompt": ""})
            } else {
                json!({
                    "is_financial_document": true,
                    "document_type": "invoice",
                    "language": "Croatian",
                    "prompt": "Invoice with supplier, items and total"
                })
            };
            return Ok(InferenceResponse {
                text: answer.to_string(),
            });
        }

        if self.fail_extract.load(Ordering::SeqCst) {
            return Err(InferenceError::Rejected("model refused the page".to_string()));
        }
        Ok(InferenceResponse {
            text: format!("Here is the data:\n{}", extraction_answer()),
        })
    }
}

/// Review service double that records started loops
#[derive(Debug, Default)]
pub struct RecordingReview {
    loops: DashMap<String, String>,
    pub requests: Mutex<Vec<(String, ReviewRequest)>>,
    pub missing_workflows: Mutex<Vec<String>>,
}

impl RecordingReview {
    pub fn started(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request_for(&self, document_id: &str) -> Option<ReviewRequest> {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|(_, request)| request.document_id == document_id)
            .map(|(_, request)| request.clone())
    }
}

#[async_trait]
impl HumanReviewService for RecordingReview {
    async fn start_review(
        &self,
        workflow_id: &str,
        request: &ReviewRequest,
    ) -> Result<String, ReviewError> {
        if let Some(existing) = self.loops.get(&request.loop_name) {
            return Err(ReviewError::AlreadyExists {
                loop_name: request.loop_name.clone(),
                loop_id: existing.clone(),
            });
        }
        let loop_id = format!("loop-{}", self.loops.len() + 1);
        self.loops.insert(request.loop_name.clone(), loop_id.clone());
        self.requests
            .lock()
            .push((workflow_id.to_string(), request.clone()));
        Ok(loop_id)
    }

    async fn workflow_exists(&self, workflow_id: &str) -> Result<bool, ReviewError> {
        Ok(!self
            .missing_workflows
            .lock()
            .iter()
            .any(|missing| missing == workflow_id))
    }
}

pub struct Harness {
    pub system: PipelineSystem,
    pub object_store: Arc<InMemoryObjectStore>,
    pub inference: Arc<ScriptedInference>,
    pub review: Arc<RecordingReview>,
}

pub fn external_services(
    object_store: &Arc<InMemoryObjectStore>,
    inference: &Arc<ScriptedInference>,
    review: &Arc<RecordingReview>,
) -> ExternalServices {
    ExternalServices {
        object_store: Arc::clone(object_store) as Arc<dyn ObjectStore>,
        inference: Arc::clone(inference) as Arc<dyn InferenceService>,
        review: Arc::clone(review) as Arc<dyn HumanReviewService>,
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config(), |_| {}).await
}

/// Harness with a customised configuration and component set
pub async fn harness_with<F>(config: PipelineConfig, customise: F) -> Harness
where
    F: FnOnce(&mut PipelineComponents),
{
    let object_store = Arc::new(InMemoryObjectStore::new());
    let inference = Arc::new(ScriptedInference::default());
    let review = Arc::new(RecordingReview::default());

    let mut components = PipelineComponents::in_memory(&config);
    customise(&mut components);

    let system = PipelineSystem::bootstrap(
        config,
        components,
        external_services(&object_store, &inference, &review),
    )
    .await
    .expect("pipeline bootstrap");

    Harness {
        system,
        object_store,
        inference,
        review,
    }
}

impl Harness {
    /// Upload an intake image and fire the intake trigger
    pub async fn upload(&self, document_id: &str) -> DocumentRecord {
        let key = format!("acquire/{document_id}.png");
        let locator = ObjectLocator::new(BUCKET, key.clone());
        self.object_store
            .put(&locator, b"\x89PNG fake scan".to_vec())
            .await
            .expect("intake upload");
        self.system
            .trigger()
            .handle(ObjectCreatedEvent {
                bucket: BUCKET.to_string(),
                key,
            })
            .await
            .expect("intake trigger")
            .expect("intake object accepted")
    }

    /// Process every stage queue until all of them come back empty
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        for _ in 0..100 {
            let mut received = 0;
            for consumer in self.system.consumers() {
                let stats = consumer.process_batch().await.expect("stage batch");
                received += stats.received;
            }
            if received == 0 {
                return handled;
            }
            handled += received;
        }
        panic!("pipeline did not settle");
    }

    pub async fn record(&self, document_id: &str) -> DocumentRecord {
        self.system
            .store()
            .require(document_id)
            .await
            .expect("tracked document")
    }

    /// Completion event for the review loop recorded on the document
    pub async fn completion(
        &self,
        document_id: &str,
        status: ReviewStatus,
        answers: Value,
    ) -> ReviewCompletionEvent {
        let record = self.record(document_id).await;
        let augment = record.maps.augment.expect("review requested");
        let request = self
            .review
            .request_for(document_id)
            .expect("review loop started");
        ReviewCompletionEvent {
            workflow_id: augment.workflow_id.expect("workflow recorded"),
            review_loop_id: augment.review_loop_id.expect("loop recorded"),
            status,
            loop_input: request.input,
            answers,
            output_locator: Some(ObjectLocator::new(
                "docpipe-review-output",
                format!("{document_id}/output.json"),
            )),
            completed_at: None,
        }
    }
}

pub fn reviewer_answers() -> Value {
    json!({
        "tableTypes": [
            {"name": "formdata", "columnTypes": ["Key", "Value"]},
            {"name": "items", "columnTypes": ["Description", "Quantity", "Price"]}
        ]
    })
}
