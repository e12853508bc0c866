//! Classify: decide whether the intake image is a financial document and describe it well
//! enough to prompt the extraction.

use super::{media_type, ActorContext, ActorError, StageActor};
use crate::constants::object_keys;
use crate::models::{ClassifyMap, StageMapUpdate};
use crate::services::{extract_json_object, put_json, Attachment, InferenceRequest};
use crate::state_machine::Stage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

const CLASSIFY_PROMPT: &str = r#"You are given an image. Classify whether it is a financial document and, if so, which kind: for example invoice, bank statement, balance sheet, income statement or cash-flow statement.
Also detect the language of the document and describe its content so that a prompt for data extraction can be generated.

Output instructions:
Include only a JSON object in your answer, with no leading or trailing text.

Example answer:
{
    "is_financial_document": true,
    "document_type": "invoice",
    "language": "Croatian",
    "prompt": "Invoice containing details about the supplier, customer, invoice number, delivery date, product list, and summary."
}

If the image is not a financial document answer:
{
    "is_financial_document": false,
    "document_type": "",
    "language": "",
    "prompt": ""
}"#;

#[derive(Debug, Deserialize)]
struct ClassifyAnswer {
    is_financial_document: bool,
    #[serde(default)]
    document_type: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyActor;

#[async_trait]
impl StageActor for ClassifyActor {
    fn stage(&self) -> Stage {
        Stage::Classify
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let input = ctx.intake_input()?;
        ctx.note("stage_input", Value::String(input.url()));

        let services = ctx.services();
        let bytes = services.object_store.get(&input).await?;
        let request = InferenceRequest {
            prompt: CLASSIFY_PROMPT.to_string(),
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
        let object = extract_json_object(&response.text)?;
        debug!(document_id = %ctx.document_id(), answer = ?object, "Classification answer");

        let output = ctx.locator(object_keys::classify_output(ctx.document_id()));
        put_json(services.object_store.as_ref(), &output, &object).await?;

        let answer: ClassifyAnswer = serde_json::from_value(Value::Object(object))
            .map_err(|e| ActorError::invalid_output(format!("classification answer: {e}")))?;

        if !answer.is_financial_document {
            return Err(ActorError::Rejected(
                "document is not a financial document".to_string(),
            ));
        }
        for (field, value) in [
            ("document_type", &answer.document_type),
            ("language", &answer.language),
            ("prompt", &answer.prompt),
        ] {
            if value.trim().is_empty() {
                return Err(ActorError::invalid_output(format!(
                    "classification answer has no {field}"
                )));
            }
        }

        info!(
            document_id = %ctx.document_id(),
            document_type = %answer.document_type,
            language = %answer.language,
            "✅ Document classified"
        );

        Ok(StageMapUpdate::Classify(ClassifyMap {
            stage_output: Some(output),
            is_financial_document: Some(true),
            document_type: Some(answer.document_type),
            language: Some(answer.language),
            prompt: Some(answer.prompt),
        }))
    }
}
