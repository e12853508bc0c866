//! # External Services
//!
//! Interfaces to the collaborators the pipeline does not own: object storage, the hosted
//! inference model, and the human-review workflow service.

pub mod inference;
pub mod object_store;
pub mod review;

pub use inference::{
    extract_json_object, Attachment, InferenceError, InferenceRequest, InferenceResponse,
    InferenceService,
};
pub use object_store::{
    get_json, put_json, InMemoryObjectStore, LocalObjectStore, ObjectStore, StoreError,
    StoreResult,
};
pub use review::{HumanReviewService, ReviewError, ReviewRequest, ReviewWorkflowRegistry};
