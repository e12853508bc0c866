//! Tracking store errors.

use crate::models::MapValidationError;
use crate::state_machine::StageState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Document not found: {document_id}")]
    NotFound { document_id: String },

    #[error("Document {document_id} is {actual}, expected {expected}")]
    StaleState {
        document_id: String,
        expected: StageState,
        actual: StageState,
    },

    #[error("Document {document_id} changed concurrently {attempts} times in a row")]
    VersionConflict { document_id: String, attempts: u32 },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Record serialization error: {message}")]
    Serialization { message: String },

    #[error(transparent)]
    InvalidUpdate(#[from] MapValidationError),
}

impl TrackingError {
    pub fn not_found(document_id: impl Into<String>) -> Self {
        Self::NotFound {
            document_id: document_id.into(),
        }
    }

    pub fn stale_state(
        document_id: impl Into<String>,
        expected: StageState,
        actual: StageState,
    ) -> Self {
        Self::StaleState {
            document_id: document_id.into(),
            expected,
            actual,
        }
    }

    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Infrastructure trouble that a redelivery may get past
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::VersionConflict { .. })
    }
}

impl From<sqlx::Error> for TrackingError {
    fn from(err: sqlx::Error) -> Self {
        TrackingError::database("query", err.to_string())
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::Serialization {
            message: err.to_string(),
        }
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;
