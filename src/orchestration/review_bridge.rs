//! # Human-Review Bridge
//!
//! Turns a review-completion event from the external review service into an augment
//! `Review` message, so the reviewer's answer goes through the normal await path.
//!
//! The bridge keeps no state. Events from workflows that do not belong to this pipeline,
//! or without a document id in the loop input, are rejected with a warning.

use crate::constants::{REVIEW_DOCUMENT_ID_KEY, REVIEW_TABLE_TYPES_KEY};
use crate::error::Result;
use crate::messaging::{ActorGrade, QueueRegistry, StageMessage};
use crate::models::{AugmentMap, ObjectLocator, ReviewStatus, StageMapUpdate, TableType};
use crate::services::ReviewWorkflowRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Status change of a human review loop, as reported by the review service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCompletionEvent {
    pub workflow_id: String,
    pub review_loop_id: String,
    pub status: ReviewStatus,
    /// Input the loop was started with; carries `documentId`
    pub loop_input: Value,
    /// Reviewer answers; carries `tableTypes` on completion
    #[serde(default)]
    pub answers: Value,
    #[serde(default)]
    pub output_locator: Option<ObjectLocator>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    Enqueued { document_id: String, msg_id: i64 },
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct HumanReviewBridge {
    workflows: ReviewWorkflowRegistry,
    queues: Arc<QueueRegistry>,
}

impl HumanReviewBridge {
    pub fn new(workflows: ReviewWorkflowRegistry, queues: Arc<QueueRegistry>) -> Self {
        Self { workflows, queues }
    }

    #[instrument(skip(self, event), fields(workflow_id = %event.workflow_id, review_loop_id = %event.review_loop_id))]
    pub async fn handle(&self, event: ReviewCompletionEvent) -> Result<BridgeOutcome> {
        if !self.workflows.contains(&event.workflow_id) {
            return Ok(reject("review workflow is not owned by this pipeline"));
        }
        let Some(document_id) = event
            .loop_input
            .get(REVIEW_DOCUMENT_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(reject("review loop input has no document id"));
        };

        let table_types = parse_table_types(&event.answers);
        let (grade, failure_reason) = match (event.status, &table_types) {
            (ReviewStatus::Completed, Some(_)) => (ActorGrade::Pass, None),
            (ReviewStatus::Completed, None) => (
                ActorGrade::Fail,
                Some("review completed without table types".to_string()),
            ),
            (status, _) => (
                ActorGrade::Fail,
                Some(format!("human review ended as {status:?}").to_lowercase()),
            ),
        };

        let update = StageMapUpdate::Augment(AugmentMap {
            review_loop_id: Some(event.review_loop_id.clone()),
            review_status: Some(event.status),
            table_types,
            review_output: event.output_locator,
            reviewed_at: Some(event.completed_at.unwrap_or_else(Utc::now)),
            ..Default::default()
        });

        let message = StageMessage::review(&document_id, update, grade, failure_reason);
        let msg_id = self.queues.send(message).await?;

        info!(
            document_id = %document_id,
            status = ?event.status,
            msg_id,
            "📨 Review completion forwarded"
        );
        Ok(BridgeOutcome::Enqueued {
            document_id,
            msg_id,
        })
    }
}

fn reject(reason: &str) -> BridgeOutcome {
    warn!(reason = %reason, "Review completion rejected");
    BridgeOutcome::Rejected(reason.to_string())
}

/// Reviewer table types, from either `{"tableTypes": ..}` or a list of answers whose
/// `answerContent` holds them. The value may also arrive as a JSON-encoded string.
pub fn parse_table_types(answers: &Value) -> Option<Vec<TableType>> {
    let raw = match answers {
        Value::Object(map) => map.get(REVIEW_TABLE_TYPES_KEY),
        Value::Array(list) => list.iter().find_map(|answer| {
            answer
                .get("answerContent")
                .and_then(|content| content.get(REVIEW_TABLE_TYPES_KEY))
        }),
        _ => None,
    }?;

    let decoded = match raw {
        Value::String(text) => serde_json::from_str::<Value>(text).ok()?,
        other => other.clone(),
    };
    serde_json::from_value(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_table_types_shapes() {
        let direct = json!({"tableTypes": [{"name": "formdata", "columnTypes": ["Key", "Value"]}]});
        let parsed = parse_table_types(&direct).unwrap();
        assert_eq!(parsed[0].name, "formdata");
        assert_eq!(parsed[0].column_types, vec!["Key", "Value"]);

        let listed = json!([{"answerContent": {"tableTypes": "[{\"name\":\"items\",\"columnTypes\":[\"Qty\"]}]"}}]);
        assert_eq!(parse_table_types(&listed).unwrap()[0].name, "items");

        assert!(parse_table_types(&json!({"other": 1})).is_none());
        assert!(parse_table_types(&Value::Null).is_none());
    }
}
