use super::states::Stage;
use serde::{Deserialize, Serialize};

/// Events that can move a document between stage states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DocumentEvent {
    /// Enter a processing stage (promote into it, or re-request its actor)
    Begin(Stage),
    /// The terminal stage passed
    Complete,
    /// Stop forward progress with a reason
    Fail(String),
    /// Rewind to an earlier (or the current) processing stage
    Restart(Stage),
}

impl DocumentEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Begin(_) => "begin",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Restart(_) => "restart",
        }
    }

    /// Extract failure reason if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) => Some(reason),
            _ => None,
        }
    }

    /// Create a failure event with the given reason
    pub fn fail_with_reason(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }
}
