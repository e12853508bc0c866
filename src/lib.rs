#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Docpipe Core
//!
//! Durable coordination engine for a document extraction pipeline.
//!
//! ## Overview
//!
//! Documents move through a fixed sequence of stages: classify, extract, operate, reshape,
//! augment (human review) and catalog. Each stage is split into begin, actor and await
//! roles that talk only through per-stage work queues and a shared tracking store. Delivery
//! is at-least-once; every step re-reads the durable record and commits with a
//! compare-and-set, so redelivered and duplicate messages are harmless.
//!
//! Human review is a suspension, not a wait: a document in review is stored in the augment
//! state with its review loop id, and the review bridge resumes it when the reviewer
//! answers.
//!
//! ## Module Organization
//!
//! - [`models`] - Document records, typed stage maps, object locators
//! - [`state_machine`] - Stages, states and the document lifecycle rules
//! - [`tracking`] - Tracking store trait with in-memory and PostgreSQL backends
//! - [`messaging`] - Stage messages and work queues (in-memory and pgmq)
//! - [`services`] - Object store, inference and human-review interfaces
//! - [`actors`] - Business work of each processing stage
//! - [`orchestration`] - Runners, control plane, review bridge, consumers, bootstrap
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docpipe::config::ConfigManager;
//! use docpipe::orchestration::{ExternalServices, PipelineComponents, PipelineSystem};
//!
//! # async fn example(services: ExternalServices) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//! docpipe::logging::init_structured_logging(&config.logging);
//!
//! let components = PipelineComponents::from_config(&config).await?;
//! let system = PipelineSystem::bootstrap(config, components, services).await?;
//! let handle = system.start();
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod actors;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod services;
pub mod state_machine;
pub mod tracking;

pub use config::{ConfigManager, PipelineConfig};
pub use error::{PipelineError, Result};
pub use messaging::{StageMessage, WorkQueue};
pub use models::{DocumentRecord, StageMapUpdate};
pub use orchestration::{ControlPlaneManager, PipelineSystem};
pub use state_machine::{Stage, StageState};
pub use tracking::TrackingStore;
