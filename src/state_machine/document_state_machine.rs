use super::{
    errors::{StateMachineError, StateMachineResult},
    events::DocumentEvent,
    states::{Stage, StageState},
};
use crate::models::DocumentRecord;

/// Transition rules for a single document.
///
/// The machine is pure: it decides the target state for an event and leaves persistence to
/// the tracking store's compare-and-set, so any component can rebuild it from a freshly read
/// record after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStateMachine {
    state: StageState,
    failed_stage: Option<Stage>,
}

impl DocumentStateMachine {
    pub fn new(state: StageState, failed_stage: Option<Stage>) -> Self {
        Self {
            state,
            failed_stage,
        }
    }

    /// Build the machine from the persisted record
    pub fn for_record(record: &DocumentRecord) -> Self {
        Self::new(
            record.stage_state,
            record.failure.as_ref().map(|failure| failure.failed_stage),
        )
    }

    pub fn current_state(&self) -> StageState {
        self.state
    }

    /// Furthest stage the document has entered
    pub fn reached_stage(&self) -> Stage {
        match self.state {
            StageState::Complete => Stage::last(),
            StageState::Failed => self.failed_stage.unwrap_or(Stage::Acquire),
            other => other.stage().unwrap_or(Stage::Acquire),
        }
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(&self, event: &DocumentEvent) -> StateMachineResult<StageState> {
        match event {
            DocumentEvent::Begin(stage) => self.begin_target(*stage),
            DocumentEvent::Complete => match self.state {
                state if state.is_terminal() => Err(self.terminal_error()),
                state if state.stage() == Some(Stage::last()) => Ok(StageState::Complete),
                _ => Err(self.invalid(event)),
            },
            DocumentEvent::Fail(_) => {
                if self.state.is_terminal() {
                    Err(self.terminal_error())
                } else {
                    Ok(StageState::Failed)
                }
            }
            DocumentEvent::Restart(stage) => self.restart_target(*stage),
        }
    }

    fn begin_target(&self, stage: Stage) -> StateMachineResult<StageState> {
        if !stage.is_processing() {
            return Err(StateMachineError::NotAProcessingStage {
                stage: stage.to_string(),
            });
        }
        if self.state.is_terminal() {
            return Err(self.terminal_error());
        }

        let current = self.state.stage().unwrap_or(Stage::Acquire);
        // Re-entering the current stage only re-requests its actor
        if current == stage || current.next() == Some(stage) {
            Ok(StageState::from(stage))
        } else {
            Err(self.invalid(&DocumentEvent::Begin(stage)))
        }
    }

    fn restart_target(&self, stage: Stage) -> StateMachineResult<StageState> {
        if !stage.is_processing() {
            return Err(StateMachineError::NotAProcessingStage {
                stage: stage.to_string(),
            });
        }

        let reached = self.reached_stage();
        if stage.ordinal() > reached.ordinal() {
            return Err(StateMachineError::RestartBeyondProgress {
                target: stage.to_string(),
                reached: reached.to_string(),
            });
        }

        Ok(StageState::from(stage))
    }

    fn terminal_error(&self) -> StateMachineError {
        StateMachineError::TerminalState {
            state: self.state.to_string(),
        }
    }

    fn invalid(&self, event: &DocumentEvent) -> StateMachineError {
        StateMachineError::InvalidTransition {
            from: self.state.to_string(),
            event: format!("{event:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::STAGE_SEQUENCE;

    #[test]
    fn test_begin_follows_sequence() {
        let mut state = StageState::Acquire;
        for stage in STAGE_SEQUENCE {
            let sm = DocumentStateMachine::new(state, None);
            state = sm
                .determine_target_state(&DocumentEvent::Begin(stage))
                .unwrap();
            assert_eq!(state, StageState::from(stage));
        }

        let sm = DocumentStateMachine::new(state, None);
        assert_eq!(
            sm.determine_target_state(&DocumentEvent::Complete).unwrap(),
            StageState::Complete
        );
    }

    #[test]
    fn test_begin_cannot_skip_or_rewind() {
        let sm = DocumentStateMachine::new(StageState::Extract, None);

        assert!(sm
            .determine_target_state(&DocumentEvent::Begin(Stage::Reshape))
            .is_err());
        assert!(sm
            .determine_target_state(&DocumentEvent::Begin(Stage::Classify))
            .is_err());
        // re-begin of the current stage is allowed
        assert_eq!(
            sm.determine_target_state(&DocumentEvent::Begin(Stage::Extract))
                .unwrap(),
            StageState::Extract
        );
    }

    #[test]
    fn test_acquire_is_never_begun() {
        let sm = DocumentStateMachine::new(StageState::Acquire, None);
        assert!(matches!(
            sm.determine_target_state(&DocumentEvent::Begin(Stage::Acquire)),
            Err(StateMachineError::NotAProcessingStage { .. })
        ));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for state in [StageState::Complete, StageState::Failed] {
            let sm = DocumentStateMachine::new(state, Some(Stage::Extract));
            assert!(matches!(
                sm.determine_target_state(&DocumentEvent::Begin(Stage::Catalog)),
                Err(StateMachineError::TerminalState { .. })
            ));
            assert!(sm
                .determine_target_state(&DocumentEvent::fail_with_reason("again"))
                .is_err());
        }
    }

    #[test]
    fn test_complete_only_from_last_stage() {
        let sm = DocumentStateMachine::new(StageState::Augment, None);
        assert!(sm.determine_target_state(&DocumentEvent::Complete).is_err());
    }

    #[test]
    fn test_restart_bounded_by_reached_stage() {
        let failed = DocumentStateMachine::new(StageState::Failed, Some(Stage::Operate));
        assert_eq!(failed.reached_stage(), Stage::Operate);
        assert_eq!(
            failed
                .determine_target_state(&DocumentEvent::Restart(Stage::Extract))
                .unwrap(),
            StageState::Extract
        );
        assert_eq!(
            failed
                .determine_target_state(&DocumentEvent::Restart(Stage::Operate))
                .unwrap(),
            StageState::Operate
        );
        assert!(matches!(
            failed.determine_target_state(&DocumentEvent::Restart(Stage::Reshape)),
            Err(StateMachineError::RestartBeyondProgress { .. })
        ));

        let complete = DocumentStateMachine::new(StageState::Complete, None);
        assert!(complete
            .determine_target_state(&DocumentEvent::Restart(Stage::Catalog))
            .is_ok());
    }
}
