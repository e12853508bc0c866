//! # Pipeline Configuration
//!
//! Layered configuration for the coordination engine: built-in defaults, then
//! `config/docpipe.toml`, then `config/docpipe.{environment}.toml`, then
//! `DOCPIPE_SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docpipe::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let stale_after = manager.config().checkup.stale_after();
//! let workflows = &manager.config().review.workflows;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::state_machine::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,
    pub database: DatabaseConfig,
    pub queues: QueueConfig,
    pub store: StoreConfig,
    pub inference: InferenceConfig,
    pub review: ReviewConfig,
    pub checkup: CheckupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Prefix for queue, table and workflow names
    pub prefix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prefix: "docpipe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Work queue transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Memory,
    Pgmq,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// How long a received message stays invisible before redelivery
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            visibility_timeout_seconds: 900,
            poll_interval_ms: 1000,
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Queue name for a processing stage
    pub fn queue_name(prefix: &str, stage: Stage) -> String {
        format!("{prefix}_queue_{stage}")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket holding intake objects and every stage output
    pub document_bucket: String,
    /// Object keys under this prefix start a document
    pub intake_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            document_bucket: "docpipe-store-document".to_string(),
            intake_prefix: "acquire/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_id: "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            max_tokens: 5000,
            temperature: 0.0,
        }
    }
}

/// A review workflow created for one reviewer team
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReviewWorkflowConfig {
    pub team: String,
    pub workflow_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub workflows: Vec<ReviewWorkflowConfig>,
    /// Suspension in review longer than this is reported by checkup
    pub review_timeout_seconds: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            workflows: Vec::new(),
            review_timeout_seconds: 3 * 24 * 60 * 60,
        }
    }
}

impl ReviewConfig {
    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.review_timeout_seconds)
    }
}

/// What checkup does with a stale document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckupAction {
    /// Log and report only
    Alert,
    /// Re-drive the current stage (promote out of intake, otherwise re-request the actor)
    Resume,
    /// Restart the current stage, clearing its map
    Restart,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckupConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// A document whose stamp is older than this in a non-terminal state is stale
    pub stale_after_seconds: u64,
    pub action: CheckupAction,
    /// Records fetched per state per query
    pub batch_limit: usize,
}

impl Default for CheckupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            stale_after_seconds: 1800,
            action: CheckupAction::Alert,
            batch_limit: 100,
        }
    }
}

impl CheckupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let prefix = &self.pipeline.prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigurationError::invalid_value(
                "pipeline.prefix",
                prefix.clone(),
                "must be non-empty and contain only ASCII letters, digits and underscores",
            ));
        }

        if self.queues.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.batch_size",
                "0",
                "must be greater than zero",
            ));
        }

        if self.queues.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.visibility_timeout_seconds",
                "0",
                "must be greater than zero",
            ));
        }

        if self.queues.backend == QueueBackend::Pgmq && self.database.url.is_none() {
            return Err(ConfigurationError::missing_required("database.url"));
        }

        if self.store.document_bucket.trim().is_empty() {
            return Err(ConfigurationError::missing_required("store.document_bucket"));
        }

        if self.review.workflows.is_empty() {
            return Err(ConfigurationError::missing_required("review.workflows"));
        }

        for workflow in &self.review.workflows {
            if workflow.team.trim().is_empty() || workflow.workflow_id.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "review.workflows",
                    format!("{workflow:?}"),
                    "team and workflow_id are required",
                ));
            }
        }

        if self.checkup.batch_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "checkup.batch_limit",
                "0",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}
