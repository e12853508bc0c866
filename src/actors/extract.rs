//! Extract: turn the intake image into structured JSON using the prompt and language found
//! by classification.

use super::{media_type, ActorContext, ActorError, StageActor};
use crate::constants::object_keys;
use crate::models::{OutputMap, StageMapUpdate};
use crate::services::{extract_json_object, put_json, Attachment, InferenceRequest};
use crate::state_machine::Stage;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

fn extraction_prompt(description: &str, language: &str) -> String {
    format!(
        "You are given an image of the following document: {description}\n\
         The document is written in {language}. Extract the information it contains and \
         structure it as JSON.\n\n\
         Output instructions:\n\
         Include only a JSON object in your answer, with no leading or trailing text."
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractActor;

#[async_trait]
impl StageActor for ExtractActor {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let classify = ctx
            .record
            .maps
            .classify
            .clone()
            .ok_or_else(|| ActorError::missing_input("classify map"))?;
        let description = classify
            .prompt
            .ok_or_else(|| ActorError::missing_input("classification prompt"))?;
        let language = classify
            .language
            .ok_or_else(|| ActorError::missing_input("document language"))?;

        let input = ctx.intake_input()?;
        ctx.note("stage_input", Value::String(input.url()));

        let services = ctx.services();
        let bytes = services.object_store.get(&input).await?;
        let request = InferenceRequest {
            prompt: extraction_prompt(&description, &language),
            attachment: Some(Attachment {
                media_type: media_type(&input).to_string(),
                bytes,
            }),
            max_tokens: services.settings.max_tokens,
            temperature: services.settings.temperature,
        };

        let response = services
            .inference
            .invoke(&services.settings.model_id, &request)
            .await?;
        let extracted = extract_json_object(&response.text)?;
        if extracted.is_empty() {
            return Err(ActorError::invalid_output("extraction returned an empty object"));
        }

        let output = ctx.locator(object_keys::extract_output(ctx.document_id()));
        put_json(services.object_store.as_ref(), &output, &extracted).await?;

        info!(
            document_id = %ctx.document_id(),
            fields = extracted.len(),
            output = %output,
            "✅ Document data extracted"
        );

        Ok(StageMapUpdate::Extract(OutputMap {
            stage_output: Some(output),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_description_and_language() {
        let prompt = extraction_prompt("Invoice with supplier and totals", "Croatian");
        assert!(prompt.contains("Invoice with supplier and totals"));
        assert!(prompt.contains("Croatian"));
    }
}
