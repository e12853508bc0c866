//! # Human Review Service
//!
//! Interface to the external human-review workflow service and the registry of review
//! workflows this pipeline owns.

use crate::config::{ReviewConfig, ReviewWorkflowConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReviewError {
    /// A loop with this name was already started; carries its id
    #[error("Review loop {loop_name} already exists")]
    AlreadyExists { loop_name: String, loop_id: String },

    #[error("Review workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Review service unavailable: {0}")]
    Unavailable(String),
}

/// Request to start one human review loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub loop_name: String,
    pub document_id: String,
    /// Loop input shown to the reviewer; always carries `documentId`
    pub input: Value,
}

#[async_trait]
pub trait HumanReviewService: Send + Sync + fmt::Debug {
    /// Start a review loop and return its id
    async fn start_review(
        &self,
        workflow_id: &str,
        request: &ReviewRequest,
    ) -> Result<String, ReviewError>;

    async fn workflow_exists(&self, workflow_id: &str) -> Result<bool, ReviewError>;
}

/// Review workflows configured for this pipeline
#[derive(Debug, Clone, Default)]
pub struct ReviewWorkflowRegistry {
    workflows: Vec<ReviewWorkflowConfig>,
}

impl ReviewWorkflowRegistry {
    pub fn new(workflows: Vec<ReviewWorkflowConfig>) -> Self {
        Self { workflows }
    }

    pub fn from_config(config: &ReviewConfig) -> Self {
        Self::new(config.workflows.clone())
    }

    /// Whether a completion event for this workflow belongs to the pipeline
    pub fn contains(&self, workflow_id: &str) -> bool {
        self.workflows.iter().any(|w| w.workflow_id == workflow_id)
    }

    /// Workflow a document is routed to; stable for a given document id
    pub fn select(&self, document_id: &str) -> Option<&ReviewWorkflowConfig> {
        if self.workflows.is_empty() {
            return None;
        }
        let spread: usize = document_id.bytes().map(usize::from).sum();
        self.workflows.get(spread % self.workflows.len())
    }

    pub fn workflows(&self) -> &[ReviewWorkflowConfig] {
        &self.workflows
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ReviewWorkflowRegistry {
        ReviewWorkflowRegistry::new(vec![
            ReviewWorkflowConfig {
                team: "finance".to_string(),
                workflow_id: "wf-finance".to_string(),
            },
            ReviewWorkflowConfig {
                team: "audit".to_string(),
                workflow_id: "wf-audit".to_string(),
            },
        ])
    }

    #[test]
    fn test_selection_is_deterministic() {
        let registry = registry();
        let first = registry.select("invoice-0042").unwrap().clone();
        for _ in 0..10 {
            assert_eq!(registry.select("invoice-0042"), Some(&first));
        }
        assert!(registry.contains(&first.workflow_id));
        assert!(!registry.contains("wf-unknown"));
    }

    #[test]
    fn test_empty_registry_selects_nothing() {
        assert!(ReviewWorkflowRegistry::default().select("001").is_none());
    }
}
