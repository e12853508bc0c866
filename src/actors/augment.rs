//! Augment: request a human review of the prepared tables.
//!
//! The actor only starts the review loop. The document then stays in the augment stage until
//! the review bridge delivers the reviewer's answer.

use super::{ActorContext, ActorError, StageActor};
use crate::constants::{MAX_REVIEW_LOOP_NAME_LEN, REVIEW_DOCUMENT_ID_KEY};
use crate::models::{AugmentMap, OrderStamp, StageMapUpdate};
use crate::services::{ReviewError, ReviewRequest};
use crate::state_machine::Stage;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

/// Review loop name for a document's visit to the augment stage.
///
/// The name only depends on the document id and the stamp the document entered augment
/// with, so a redelivered request asks for the same loop again.
pub fn review_loop_name(prefix: &str, document_id: &str, entered_at: OrderStamp) -> String {
    let sanitize = |text: &str| -> String {
        text.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect()
    };

    let suffix = entered_at.as_micros().to_string();
    let room = MAX_REVIEW_LOOP_NAME_LEN.saturating_sub(suffix.len() + 2);
    // The prefix may use at most half of what the stamp leaves, the document id the rest
    let prefix: String = sanitize(prefix).chars().take(room / 2).collect();
    let document: String = sanitize(document_id)
        .chars()
        .take(room - prefix.len())
        .collect();

    format!("{prefix}-{document}-{suffix}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentActor;

#[async_trait]
impl StageActor for AugmentActor {
    fn stage(&self) -> Stage {
        Stage::Augment
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let reshape = ctx
            .record
            .maps
            .reshape
            .clone()
            .ok_or_else(|| ActorError::missing_input("reshape map"))?;
        let review_input = reshape
            .stage_output
            .ok_or_else(|| ActorError::missing_input("review input locator"))?;

        let services = ctx.services();
        let workflow = services
            .review_workflows
            .select(ctx.document_id())
            .cloned()
            .ok_or_else(|| ActorError::missing_input("review workflow"))?;

        let loop_name = review_loop_name(
            &services.settings.prefix,
            ctx.document_id(),
            ctx.record.order_stamp,
        );
        let request = ReviewRequest {
            loop_name: loop_name.clone(),
            document_id: ctx.document_id().to_string(),
            input: json!({
                REVIEW_DOCUMENT_ID_KEY: ctx.document_id(),
                "reviewInputUrl": review_input.url(),
                "tableCount": reshape.table_count,
            }),
        };

        let loop_id = match services
            .review
            .start_review(&workflow.workflow_id, &request)
            .await
        {
            Ok(loop_id) => loop_id,
            Err(ReviewError::AlreadyExists { loop_id, .. }) => {
                warn!(
                    document_id = %ctx.document_id(),
                    loop_name = %loop_name,
                    "⚠️ Review loop already started, reusing it"
                );
                loop_id
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            document_id = %ctx.document_id(),
            team = %workflow.team,
            workflow_id = %workflow.workflow_id,
            review_loop_id = %loop_id,
            "👀 Human review requested"
        );

        Ok(StageMapUpdate::Augment(AugmentMap {
            review_input: Some(review_input),
            workflow_id: Some(workflow.workflow_id),
            review_loop_id: Some(loop_id),
            review_requested_at: Some(Utc::now()),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_name_is_stable_and_bounded() {
        let stamp = OrderStamp::from_micros(1_760_000_000_000_000);
        let name = review_loop_name("docpipe", "Invoice_2024/001", stamp);
        assert_eq!(name, review_loop_name("docpipe", "Invoice_2024/001", stamp));
        assert!(name.starts_with("docpipe-invoice-2024-001-"));
        assert!(name.ends_with("1760000000000000"));

        let long_id = "x".repeat(200);
        let long = review_loop_name("docpipe", &long_id, stamp);
        assert!(long.len() <= MAX_REVIEW_LOOP_NAME_LEN);
        assert!(long.ends_with("1760000000000000"));
    }

    #[test]
    fn test_loop_name_truncates_long_prefixes() {
        let stamp = OrderStamp::from_micros(1_760_000_000_000_000);
        let prefix = "finance_documents_".repeat(5);
        let name = review_loop_name(&prefix, "invoice-001", stamp);
        assert!(name.len() <= MAX_REVIEW_LOOP_NAME_LEN, "{name} is {} long", name.len());
        assert!(name.starts_with("finance-documents-"));
        assert!(name.contains("-invoice-001-"));
        assert!(name.ends_with("1760000000000000"));

        let both_long = review_loop_name(&prefix, &"y".repeat(200), stamp);
        assert_eq!(both_long.len(), MAX_REVIEW_LOOP_NAME_LEN);
        assert!(both_long.ends_with("-1760000000000000"));
    }

    #[test]
    fn test_loop_name_changes_with_stage_entry() {
        let first = review_loop_name("docpipe", "001", OrderStamp::from_micros(1));
        let second = review_loop_name("docpipe", "001", OrderStamp::from_micros(2));
        assert_ne!(first, second);
    }
}
