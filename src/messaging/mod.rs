//! # Messaging
//!
//! Stage messages and the durable work queues that carry them between the begin, actor and
//! await roles.
//!
//! ## Overview
//!
//! Each processing stage owns one queue named `{prefix}_queue_{stage}`. Delivery is
//! at-least-once, so every consumer is idempotent against the tracking record.

pub mod errors;
pub mod in_memory_queue;
pub mod message;
pub mod pgmq_queue;
pub mod queue;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory_queue::InMemoryWorkQueue;
pub use message::{ActorGrade, Aspect, StageMessage};
pub use pgmq_queue::PgmqWorkQueue;
pub use queue::{QueueRegistry, QueuedMessage, WorkQueue};
