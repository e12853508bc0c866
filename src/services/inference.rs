//! # Inference Service
//!
//! Interface to the hosted model that classifies and extracts documents. Only the request
//! plumbing lives here; the transport is supplied by the embedding application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Inference service unavailable: {0}")]
    Unavailable(String),

    #[error("Inference request rejected: {0}")]
    Rejected(String),

    #[error("Model answer is not usable: {0}")]
    InvalidResponse(String),
}

/// Binary input sent alongside the prompt, e.g. the scanned page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
}

#[async_trait]
pub trait InferenceService: Send + Sync + fmt::Debug {
    async fn invoke(
        &self,
        model_id: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError>;
}

/// Pull the JSON object out of a model answer.
///
/// Models sometimes wrap the object in prose despite being told not to, so when the whole
/// text does not parse the outermost `{ ... }` span is tried.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, InferenceError> {
    let trimmed = text.trim();
    let parsed = serde_json::from_str::<Value>(trimmed).or_else(|_| {
        let start = trimmed.find('{');
        let end = trimmed.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<Value>(&trimmed[start..=end])
                    .map_err(|e| InferenceError::InvalidResponse(e.to_string()))
            }
            _ => Err(InferenceError::InvalidResponse(
                "no JSON object in model answer".to_string(),
            )),
        }
    })?;

    match parsed {
        Value::Object(object) => Ok(object),
        other => Err(InferenceError::InvalidResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
