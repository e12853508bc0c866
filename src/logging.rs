//! # Structured Logging Module
//!
//! Environment-aware structured logging for the pipeline runners. Output is either a human
//! readable console format or JSON lines, selected by `[logging] json`.

use crate::config::{LoggingConfig, PipelineConfig};
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Don't panic if a global subscriber is already set (test harnesses, embedding apps)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            json = config.json,
            level = %config.level,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log the effective configuration once it has been loaded
pub fn log_config_loaded(environment: &str, config: &PipelineConfig) {
    tracing::info!(
        environment = %environment,
        prefix = %config.pipeline.prefix,
        queue_backend = ?config.queues.backend,
        review_workflows = config.review.workflows.len(),
        checkup_action = ?config.checkup.action,
        "⚙️ CONFIG: Pipeline configuration loaded"
    );
}

/// Log structured data for document lifecycle operations
pub fn log_document_operation(
    operation: &str,
    document_id: &str,
    stage_state: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        document_id = %document_id,
        stage_state = stage_state,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📄 DOCUMENT_OPERATION"
    );
}

/// Log structured data for stage runner operations
pub fn log_stage_operation(
    operation: &str,
    document_id: &str,
    stage: &str,
    aspect: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        document_id = %document_id,
        stage = %stage,
        aspect = aspect,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STAGE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
