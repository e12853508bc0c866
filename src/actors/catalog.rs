//! Catalog: assemble the final entry from the extracted data, the classification and the
//! reviewer's table types.

use super::{ActorContext, ActorError, StageActor};
use crate::constants::object_keys;
use crate::models::{CatalogMap, ReviewStatus, StageMapUpdate};
use crate::services::{get_json, put_json};
use crate::state_machine::Stage;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogActor;

#[async_trait]
impl StageActor for CatalogActor {
    fn stage(&self) -> Stage {
        Stage::Catalog
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let maps = ctx.record.maps.clone();
        let extract_output = maps
            .extract
            .and_then(|extract| extract.stage_output)
            .ok_or_else(|| ActorError::missing_input("extract output locator"))?;
        let classify = maps
            .classify
            .ok_or_else(|| ActorError::missing_input("classify map"))?;
        let augment = maps
            .augment
            .ok_or_else(|| ActorError::missing_input("augment map"))?;
        if augment.review_status != Some(ReviewStatus::Completed) {
            return Err(ActorError::missing_input("completed human review"));
        }

        let store = ctx.services().object_store.clone();
        let data: Value = get_json(store.as_ref(), &extract_output).await?;
        let catalogued_at = Utc::now();

        let entry = json!({
            "documentId": ctx.document_id(),
            "documentType": classify.document_type,
            "language": classify.language,
            "source": maps.acquire.and_then(|acquire| acquire.input).map(|input| input.url()),
            "data": data,
            "tableTypes": augment.table_types.unwrap_or_default(),
            "reviewOutput": augment.review_output.map(|output| output.url()),
            "reviewedAt": augment.reviewed_at,
            "cataloguedAt": catalogued_at,
        });

        let output = ctx.locator(object_keys::catalog_output(ctx.document_id()));
        put_json(store.as_ref(), &output, &entry).await?;

        info!(
            document_id = %ctx.document_id(),
            output = %output,
            "📚 Document catalogued"
        );

        Ok(StageMapUpdate::Catalog(CatalogMap {
            stage_output: Some(output),
            catalogued_at: Some(catalogued_at),
        }))
    }
}
