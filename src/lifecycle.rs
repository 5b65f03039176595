use std::fmt;

/// Lifecycle of one build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Interrupted,
    TornDown,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

pub fn validate_transition(from: RunState, to: RunState) -> Result<(), InvalidTransition> {
    let valid = matches!(
        (from, to),
        (RunState::Idle, RunState::Running)
            | (
                RunState::Running,
                RunState::Completed | RunState::Failed | RunState::Interrupted
            )
            | (
                RunState::Idle
                    | RunState::Completed
                    | RunState::Failed
                    | RunState::Interrupted,
                RunState::TornDown
            )
    );

    if valid {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(RunState::Idle, RunState::Running).is_ok());
        assert!(validate_transition(RunState::Running, RunState::Completed).is_ok());
        assert!(validate_transition(RunState::Running, RunState::Failed).is_ok());
        assert!(validate_transition(RunState::Running, RunState::Interrupted).is_ok());
        assert!(validate_transition(RunState::Completed, RunState::TornDown).is_ok());
        assert!(validate_transition(RunState::Failed, RunState::TornDown).is_ok());
        assert!(validate_transition(RunState::Interrupted, RunState::TornDown).is_ok());
        // never started, nothing to do but tear down
        assert!(validate_transition(RunState::Idle, RunState::TornDown).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(RunState::Running, RunState::TornDown).is_err());
        assert!(validate_transition(RunState::TornDown, RunState::TornDown).is_err());
        assert!(validate_transition(RunState::TornDown, RunState::Running).is_err());
        assert!(validate_transition(RunState::Completed, RunState::Running).is_err());
        assert!(validate_transition(RunState::Failed, RunState::Completed).is_err());
        assert!(validate_transition(RunState::Idle, RunState::Completed).is_err());
    }
}
