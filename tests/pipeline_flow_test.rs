mod common;

use async_trait::async_trait;
use common::*;
use docpipe::actors::{ActorContext, ActorError, StageActor};
use docpipe::constants::object_keys;
use docpipe::messaging::{
    InMemoryWorkQueue, MessagingResult, QueueRegistry, QueuedMessage, WorkQueue,
};
use docpipe::models::{ObjectLocator, ReviewStatus, StageMapUpdate};
use docpipe::orchestration::BridgeOutcome;
use docpipe::services::{get_json, ObjectStore};
use docpipe::state_machine::{Stage, StageState};
use docpipe::StageMessage;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_document_waits_for_review_then_completes() {
    let h = harness().await;

    let started = h.upload("invoice-001").await;
    assert_eq!(started.stage_state, StageState::Classify);

    h.drain().await;
    let suspended = h.record("invoice-001").await;
    assert_eq!(suspended.stage_state, StageState::Augment);
    assert!(suspended.is_awaiting_review());
    assert!(suspended.maps.catalog.is_none());
    assert_eq!(h.review.started(), 1);

    let reshape = suspended.maps.reshape.clone().unwrap();
    assert_eq!(reshape.table_count, Some(2));
    let review_input: Value = get_json(
        h.object_store.as_ref(),
        reshape.stage_output.as_ref().unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(review_input["pages"][0]["tables"].as_array().unwrap().len(), 2);

    // Nothing moves until the reviewer answers
    assert_eq!(h.drain().await, 0);
    assert_eq!(h.record("invoice-001").await.stage_state, StageState::Augment);

    let event = h
        .completion("invoice-001", ReviewStatus::Completed, reviewer_answers())
        .await;
    let outcome = h.system.bridge().handle(event).await.unwrap();
    assert!(matches!(outcome, BridgeOutcome::Enqueued { .. }));

    h.drain().await;
    let done = h.record("invoice-001").await;
    assert_eq!(done.stage_state, StageState::Complete);
    assert!(done.failure.is_none());

    let augment = done.maps.augment.clone().unwrap();
    assert_eq!(augment.review_status, Some(ReviewStatus::Completed));
    assert_eq!(augment.table_types.unwrap().len(), 2);

    let catalog = done.maps.catalog.clone().unwrap();
    let entry: Value = get_json(h.object_store.as_ref(), catalog.stage_output.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(entry["documentId"], "invoice-001");
    assert_eq!(entry["documentType"], "invoice");
    assert_eq!(entry["tableTypes"][1]["name"], "items");
    assert_eq!(entry["data"]["invoice_number"], "INV-2024-001");
}

#[tokio::test]
async fn test_extract_failure_breaks_up_document() {
    let h = harness().await;
    h.inference.fail_extract.store(true, Ordering::SeqCst);

    h.upload("invoice-002").await;
    h.drain().await;

    let failed = h.record("invoice-002").await;
    assert_eq!(failed.stage_state, StageState::Failed);
    assert!(failed.maps.classify.is_some());
    assert!(failed.maps.extract.is_none());
    assert!(failed.maps.catalog.is_none());

    let failure = failed.failure.unwrap();
    assert_eq!(failure.failed_stage, Stage::Extract);
    assert!(failure.reason.contains("model refused the page"));

    // Terminal documents stay put
    let promoted = h.system.manager().promote("invoice-002").await.unwrap();
    assert_eq!(promoted.stage_state, StageState::Failed);
    assert_eq!(h.review.started(), 0);
}

#[tokio::test]
async fn test_non_financial_document_fails_classification() {
    let h = harness().await;
    h.inference.not_financial.store(true, Ordering::SeqCst);

    h.upload("holiday-photo").await;
    h.drain().await;

    let failed = h.record("holiday-photo").await;
    assert_eq!(failed.stage_state, StageState::Failed);
    assert!(failed.maps.classify.is_none());
    let failure = failed.failure.unwrap();
    assert_eq!(failure.failed_stage, Stage::Classify);
    assert!(failure.reason.contains("not a financial document"));
}

#[tokio::test]
async fn test_duplicate_review_completion_is_harmless() {
    let h = harness().await;
    h.upload("invoice-003").await;
    h.drain().await;

    let event = h
        .completion("invoice-003", ReviewStatus::Completed, reviewer_answers())
        .await;
    h.system.bridge().handle(event.clone()).await.unwrap();
    h.system.bridge().handle(event.clone()).await.unwrap();
    h.drain().await;

    let first = h.record("invoice-003").await;
    assert_eq!(first.stage_state, StageState::Complete);

    h.system.bridge().handle(event).await.unwrap();
    h.drain().await;
    let second = h.record("invoice-003").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_repeated_intake_event_starts_once() {
    let h = harness().await;
    let first = h.upload("invoice-004").await;
    let second = h.upload("invoice-004").await;
    assert_eq!(first.order_stamp, second.order_stamp);

    h.drain().await;
    assert_eq!(h.review.started(), 1);
}

#[tokio::test]
async fn test_intake_outside_prefix_is_ignored() {
    let h = harness().await;
    let ignored = h
        .system
        .trigger()
        .handle(docpipe::orchestration::ObjectCreatedEvent {
            bucket: BUCKET.to_string(),
            key: "classify/invoice-005.json".to_string(),
        })
        .await
        .unwrap();
    assert!(ignored.is_none());
    assert!(h.system.store().get("invoice-005").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stopped_review_fails_document() {
    let h = harness().await;
    h.upload("invoice-006").await;
    h.drain().await;

    let event = h
        .completion("invoice-006", ReviewStatus::Stopped, Value::Null)
        .await;
    h.system.bridge().handle(event).await.unwrap();
    h.drain().await;

    let failed = h.record("invoice-006").await;
    assert_eq!(failed.stage_state, StageState::Failed);
    assert_eq!(failed.failure.unwrap().failed_stage, Stage::Augment);
    assert!(failed.maps.catalog.is_none());
}

#[tokio::test]
async fn test_completed_review_without_table_types_fails() {
    let h = harness().await;
    h.upload("invoice-007").await;
    h.drain().await;

    let event = h
        .completion("invoice-007", ReviewStatus::Completed, json!({"comment": "ok"}))
        .await;
    h.system.bridge().handle(event).await.unwrap();
    h.drain().await;

    let failed = h.record("invoice-007").await;
    assert_eq!(failed.stage_state, StageState::Failed);
    assert!(failed.failure.unwrap().reason.contains("table types"));
}

#[tokio::test]
async fn test_completion_for_another_loop_is_dropped() {
    let h = harness().await;
    h.upload("invoice-008").await;
    h.drain().await;

    let mut event = h
        .completion("invoice-008", ReviewStatus::Completed, reviewer_answers())
        .await;
    event.review_loop_id = "loop-from-an-earlier-visit".to_string();
    h.system.bridge().handle(event).await.unwrap();
    h.drain().await;

    let record = h.record("invoice-008").await;
    assert_eq!(record.stage_state, StageState::Augment);
    assert!(record.is_awaiting_review());
}

#[tokio::test]
async fn test_bridge_rejects_foreign_events() {
    let h = harness().await;
    h.upload("invoice-009").await;
    h.drain().await;

    let mut foreign = h
        .completion("invoice-009", ReviewStatus::Completed, reviewer_answers())
        .await;
    foreign.workflow_id = "someone-elses-workflow".to_string();
    assert!(matches!(
        h.system.bridge().handle(foreign).await.unwrap(),
        BridgeOutcome::Rejected(_)
    ));

    let mut anonymous = h
        .completion("invoice-009", ReviewStatus::Completed, reviewer_answers())
        .await;
    anonymous.loop_input = json!({"reviewInputUrl": "s3://bucket/key"});
    assert!(matches!(
        h.system.bridge().handle(anonymous).await.unwrap(),
        BridgeOutcome::Rejected(_)
    ));

    assert_eq!(h.drain().await, 0);
    assert!(h.record("invoice-009").await.is_awaiting_review());
}

#[derive(Debug)]
struct PanickingClassifier;

#[async_trait]
impl StageActor for PanickingClassifier {
    fn stage(&self) -> Stage {
        Stage::Classify
    }

    async fn act(&self, _ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        panic!("scanner driver exploded");
    }
}

#[tokio::test]
async fn test_actor_panic_becomes_failure() {
    let h = harness_with(test_config(), |components| {
        components
            .actors
            .retain(|actor| actor.stage() != Stage::Classify);
        components.actors.push(Arc::new(PanickingClassifier));
    })
    .await;

    h.upload("invoice-010").await;
    h.drain().await;

    let failed = h.record("invoice-010").await;
    assert_eq!(failed.stage_state, StageState::Failed);
    let failure = failed.failure.unwrap();
    assert_eq!(failure.failed_stage, Stage::Classify);
    assert!(failure.reason.contains("scanner driver exploded"));
}

#[tokio::test]
async fn test_stage_outputs_are_written_to_the_document_bucket() {
    let h = harness().await;
    h.upload("invoice-011").await;
    h.drain().await;

    for key in [
        object_keys::classify_output("invoice-011"),
        object_keys::extract_output("invoice-011"),
        object_keys::operate_output("invoice-011"),
        object_keys::reshape_output("invoice-011"),
    ] {
        assert!(
            h.object_store.contains(&ObjectLocator::new(BUCKET, key.clone())),
            "missing {key}"
        );
    }

    let review_document = h
        .object_store
        .get(&ObjectLocator::new(
            BUCKET,
            object_keys::operate_output("invoice-011"),
        ))
        .await
        .unwrap();
    let review_document: Value = serde_json::from_slice(&review_document).unwrap();
    assert_eq!(review_document["numPages"], 1);
}

#[tokio::test]
async fn test_unprovisioned_workflow_fails_bootstrap() {
    let config = test_config();
    let object_store = Arc::new(docpipe::services::InMemoryObjectStore::new());
    let inference = Arc::new(ScriptedInference::default());
    let review = Arc::new(RecordingReview::default());
    review.missing_workflows.lock().push(WORKFLOW_ID.to_string());

    let components = docpipe::orchestration::PipelineComponents::in_memory(&config);
    let result = docpipe::orchestration::PipelineSystem::bootstrap(
        config,
        components,
        external_services(&object_store, &inference, &review),
    )
    .await;

    assert!(matches!(
        result,
        Err(docpipe::PipelineError::Configuration(
            docpipe::config::ConfigurationError::WorkflowNotProvisioned { .. }
        ))
    ));
}

/// In-memory queue whose acks are swallowed while `hold` is set, leaving handled
/// messages in flight as if the consumer died before acknowledging them
#[derive(Debug)]
struct HeldAcks {
    inner: Arc<InMemoryWorkQueue>,
    hold: Arc<AtomicBool>,
}

#[async_trait]
impl WorkQueue for HeldAcks {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, message: &StageMessage) -> MessagingResult<i64> {
        self.inner.send(message).await
    }

    async fn receive(
        &self,
        limit: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<QueuedMessage>> {
        self.inner.receive(limit, visibility_timeout).await
    }

    async fn ack(&self, msg_id: i64) -> MessagingResult<bool> {
        if self.hold.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.inner.ack(msg_id).await
    }

    async fn purge(&self) -> MessagingResult<u64> {
        self.inner.purge().await
    }
}

#[tokio::test]
async fn test_redelivered_stage_messages_match_a_single_run() {
    let single = harness().await;
    single.upload("invoice-020").await;
    single.drain().await;
    let expected = single.record("invoice-020").await;

    let config = test_config();
    let prefix = config.pipeline.prefix.clone();
    let hold = Arc::new(AtomicBool::new(true));
    let mut backing: Vec<Arc<InMemoryWorkQueue>> = Vec::new();
    let h = harness_with(config, |components| {
        components.queues = Arc::new(QueueRegistry::build(&prefix, |name| {
            let inner = Arc::new(InMemoryWorkQueue::new(name));
            backing.push(Arc::clone(&inner));
            Arc::new(HeldAcks {
                inner,
                hold: Arc::clone(&hold),
            }) as Arc<dyn WorkQueue>
        }));
    })
    .await;

    // First pass: every message is handled but never acknowledged
    h.upload("invoice-020").await;
    h.drain().await;
    assert_eq!(h.record("invoice-020").await.stage_state, StageState::Augment);
    assert!(backing.iter().any(|queue| !queue.is_empty()));

    // Visibility timeouts lapse and the whole history is delivered again
    hold.store(false, Ordering::SeqCst);
    for queue in &backing {
        queue.expire_in_flight();
    }
    assert!(h.drain().await > 0);
    assert!(backing.iter().all(|queue| queue.is_empty()));

    let redelivered = h.record("invoice-020").await;
    assert_eq!(redelivered.stage_state, expected.stage_state);
    assert!(redelivered.is_awaiting_review());
    assert!(redelivered.failure.is_none());
    assert_eq!(redelivered.maps.classify, expected.maps.classify);
    assert_eq!(redelivered.maps.extract, expected.maps.extract);
    assert_eq!(redelivered.maps.operate, expected.maps.operate);
    assert_eq!(redelivered.maps.reshape, expected.maps.reshape);

    let augment = redelivered.maps.augment.clone().unwrap();
    let single_augment = expected.maps.augment.clone().unwrap();
    assert_eq!(augment.workflow_id, single_augment.workflow_id);
    assert_eq!(augment.review_loop_id, single_augment.review_loop_id);
    assert_eq!(augment.review_input, single_augment.review_input);

    // The redelivered augment request reuses the loop instead of opening a second one
    assert_eq!(h.review.started(), 1);

    let event = h
        .completion("invoice-020", ReviewStatus::Completed, reviewer_answers())
        .await;
    h.system.bridge().handle(event).await.unwrap();
    h.drain().await;
    assert_eq!(h.record("invoice-020").await.stage_state, StageState::Complete);
}
