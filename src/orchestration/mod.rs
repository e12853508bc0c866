//! # Orchestration
//!
//! Coordination of documents through the stage pipeline.
//!
//! ## Overview
//!
//! Each processing stage runs the same triad over its own queue:
//!
//! - **Begin** (`BeginRunner`) moves the record into the stage and requests the actor.
//! - **Actor** (`ActorRunner`) runs the stage's business work and reports PASS or FAIL.
//! - **Await** (`AwaitRunner`) commits the result and asks the control plane to promote or
//!   break up the document.
//!
//! The `ControlPlaneManager` owns every document lifecycle change (startup, promote,
//! breakup, restart, checkup). The human-review bridge and the intake trigger adapt
//! external events into control-plane calls and stage messages. `PipelineSystem` wires it
//! all together and runs one `StageConsumer` per stage.

pub mod actor_runner;
pub mod await_runner;
pub mod begin;
pub mod bootstrap;
pub mod checkup;
pub mod consumer;
pub mod manager;
pub mod review_bridge;
pub mod trigger;

pub use actor_runner::{ActorOutcome, ActorRunner};
pub use await_runner::{AwaitOutcome, AwaitRunner};
pub use begin::BeginRunner;
pub use bootstrap::{
    ExternalServices, PipelineComponents, PipelineHandle, PipelineSystem,
};
pub use checkup::{CheckupPolicy, CheckupReport, StaleDocument};
pub use consumer::{BatchStats, StageConsumer};
pub use manager::ControlPlaneManager;
pub use review_bridge::{
    parse_table_types, BridgeOutcome, HumanReviewBridge, ReviewCompletionEvent,
};
pub use trigger::{IntakeTrigger, ObjectCreatedEvent};
