// State machine module for document progress
//
// A document's control flow is an explicit finite-state machine keyed by document id: each
// pipeline stage is a state and begin/actor/await are the edges that trigger transitions.

pub mod document_state_machine;
pub mod errors;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use document_state_machine::DocumentStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::DocumentEvent;
pub use states::{Stage, StageState, STAGE_SEQUENCE};
