use serde::{Deserialize, Serialize};

/// Lifecycle of a workflow run as seen by this worker.
///
/// Derived from applied activations and harvested commands, never stored:
/// the server's history is the only durable record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Instance constructed, start job not yet applied.
    Created,
    /// User tasks runnable or running.
    Running,
    /// All tasks blocked on pending operations.
    Suspended,
    /// A terminal command has been buffered this activation; no further
    /// commands may be emitted.
    Completing,
    /// Terminal.
    Completed,
    /// Terminal.
    Failed,
    /// Terminal. The run was re-incarnated under a fresh history.
    ContinuedAsNew,
}

impl RunState {
    /// Whether the run has reached a terminal state. Activations arriving
    /// after this point are a protocol violation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::ContinuedAsNew)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Suspended => write!(f, "Suspended"),
            Self::Completing => write!(f, "Completing"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::ContinuedAsNew => write!(f, "ContinuedAsNew"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_three_closed_states_are_terminal() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::ContinuedAsNew.is_terminal());

        assert!(!RunState::Created.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Suspended.is_terminal());
        assert!(!RunState::Completing.is_terminal());
    }
}
