use thiserror::Error;

/// Errors raised when a document event is not allowed from the current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Document is terminal ({state}); no further transitions allowed")]
    TerminalState { state: String },

    #[error("Cannot restart at {target}: document has only reached {reached}")]
    RestartBeyondProgress { target: String, reached: String },

    #[error("Stage {stage} has no actor and cannot be entered")]
    NotAProcessingStage { stage: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
