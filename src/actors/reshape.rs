//! Reshape: validate the review document and turn it into the human-review input by adding
//! an empty `headerColumnTypes` slot to every table for the reviewer's annotations.

use super::{ActorContext, ActorError, StageActor};
use crate::constants::object_keys;
use crate::models::{ReshapeMap, StageMapUpdate};
use crate::services::{get_json, put_json};
use crate::state_machine::Stage;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// Add annotation slots in place; returns the number of tables
fn prepare_review_input(document: &mut Value) -> Result<u32, ActorError> {
    let pages = document
        .get_mut("pages")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ActorError::invalid_output("review document has no pages"))?;

    let mut table_count = 0u32;
    for (page_index, page) in pages.iter_mut().enumerate() {
        let tables = page
            .get_mut("tables")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| {
                ActorError::invalid_output(format!("page {page_index} has no tables array"))
            })?;

        for table in tables.iter_mut() {
            let table = table.as_object_mut().ok_or_else(|| {
                ActorError::invalid_output(format!("page {page_index} has a non-object table"))
            })?;
            if !table.get("name").is_some_and(Value::is_string) {
                return Err(ActorError::invalid_output(format!(
                    "page {page_index} has a table without a name"
                )));
            }
            if !table.get("rows").is_some_and(Value::is_array) {
                return Err(ActorError::invalid_output(format!(
                    "page {page_index} has a table without rows"
                )));
            }
            table.insert("headerColumnTypes".to_string(), Value::Object(Map::new()));
            table_count += 1;
        }
    }

    if table_count == 0 {
        return Err(ActorError::invalid_output("review document has no tables"));
    }
    Ok(table_count)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReshapeActor;

#[async_trait]
impl StageActor for ReshapeActor {
    fn stage(&self) -> Stage {
        Stage::Reshape
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let source = ctx
            .record
            .maps
            .operate
            .as_ref()
            .and_then(|operate| operate.stage_output.clone())
            .ok_or_else(|| ActorError::missing_input("operate output locator"))?;
        ctx.note("stage_input", Value::String(source.url()));

        let store = ctx.services().object_store.clone();
        let mut document: Value = get_json(store.as_ref(), &source).await?;
        let table_count = prepare_review_input(&mut document)?;

        let output = ctx.locator(object_keys::reshape_output(ctx.document_id()));
        put_json(store.as_ref(), &output, &document).await?;

        info!(
            document_id = %ctx.document_id(),
            table_count,
            "✅ Review input prepared"
        );

        Ok(StageMapUpdate::Reshape(ReshapeMap {
            stage_output: Some(output),
            table_count: Some(table_count),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annotation_slots_are_added() {
        let mut document = json!({
            "pages": [{ "tables": [
                { "name": "formdata", "rows": [] },
                { "name": "items", "rows": [[]] }
            ]}]
        });
        assert_eq!(prepare_review_input(&mut document).unwrap(), 2);
        assert_eq!(document["pages"][0]["tables"][1]["headerColumnTypes"], json!({}));
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(prepare_review_input(&mut json!({})).is_err());
        assert!(prepare_review_input(&mut json!({"pages": [{"tables": []}]})).is_err());
        assert!(prepare_review_input(&mut json!({"pages": [{"tables": [{"rows": []}]}]})).is_err());
    }
}
