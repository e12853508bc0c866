//! # Pipeline Error Types
//!
//! Crate-wide error returned by the runners and the control plane. Component errors convert
//! into it with `?`; business failures from stage actors never reach this type because the
//! actor runner turns them into a FAIL grade.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::models::MapValidationError;
use crate::services::{InferenceError, ReviewError, StoreError};
use crate::state_machine::StateMachineError;
use crate::tracking::TrackingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Tracking store error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Review service error: {0}")]
    Review(#[from] ReviewError),

    #[error("Map validation error: {0}")]
    MapValidation(#[from] MapValidationError),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl PipelineError {
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    /// Errors worth retrying through queue redelivery
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Tracking(err) => err.is_transient(),
            Self::Messaging(err) => !err.is_poison(),
            Self::Store(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
