use serde::{Deserialize, Serialize};

/// Lifecycle states of a human-in-the-loop workflow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Interpreting,
    Planning,
    BackupVerify,
    Executing,
    Reviewing,
    Finalizing,
    Completed,
    Error,
}

impl WorkflowState {
    /// Whether `self → next` is an edge of the lifecycle graph. Any state
    /// may fail into `Error`; `Completed` and `Error` are terminal.
    pub fn can_transition(self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        if self == Completed || self == Error {
            return false;
        }
        if next == Error {
            return true;
        }

        matches!(
            (self, next),
            (Interpreting, Planning)
                | (Interpreting, Interpreting)
                | (Planning, BackupVerify)
                | (Planning, Planning)
                | (BackupVerify, Executing)
                | (Executing, Reviewing)
                | (Reviewing, Finalizing)
                | (Reviewing, Planning)
                | (Finalizing, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkflowState::*;

    #[test]
    fn happy_path_is_valid() {
        let path = [
            Interpreting,
            Planning,
            BackupVerify,
            Executing,
            Reviewing,
            Finalizing,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn refine_and_replan_loops_are_valid() {
        assert!(Interpreting.can_transition(Interpreting));
        assert!(Planning.can_transition(Planning));
        assert!(Reviewing.can_transition(Planning));
    }

    #[test]
    fn skipping_states_is_invalid() {
        assert!(!Interpreting.can_transition(Executing));
        assert!(!Planning.can_transition(Reviewing));
        assert!(!BackupVerify.can_transition(Reviewing));
        assert!(!Executing.can_transition(Finalizing));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        assert!(!Completed.can_transition(Error));
        assert!(!Completed.can_transition(Interpreting));
        assert!(!Error.can_transition(Planning));
    }

    #[test]
    fn any_live_state_can_fail() {
        for state in [Interpreting, Planning, BackupVerify, Executing, Reviewing, Finalizing] {
            assert!(state.can_transition(Error));
        }
    }
}
