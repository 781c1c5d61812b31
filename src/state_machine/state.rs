use std::fmt;

use serde::{Deserialize, Serialize};

use super::run::JobRun;
use crate::error::RunError;

/// The lifecycle states of a single run.
///
/// Normal flow: PENDING → PROVISIONING → RUNNING → SUCCEEDED → PACKAGED → PUBLISHED.
/// FAILED and TIMED_OUT still go through packaging; ABANDONED ends a run whose
/// environment or packaging step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Packaged,
    Published,
    Abandoned,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Published | RunState::Abandoned)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "PENDING"),
            RunState::Provisioning => write!(f, "PROVISIONING"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Succeeded => write!(f, "SUCCEEDED"),
            RunState::Failed => write!(f, "FAILED"),
            RunState::TimedOut => write!(f, "TIMED_OUT"),
            RunState::Packaged => write!(f, "PACKAGED"),
            RunState::Published => write!(f, "PUBLISHED"),
            RunState::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// Validates and applies state transitions on a [`JobRun`].
pub struct StateMachine;

impl StateMachine {
    /// Whether `from → to` is an edge of the run lifecycle.
    pub fn allows(from: RunState, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (from, to),
            (Pending, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Abandoned)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Succeeded | Failed | TimedOut, Packaged)
                | (Succeeded | Failed | TimedOut, Abandoned)
                | (Packaged, Published)
        )
    }

    /// Move the run to `next`, recording the previous state in its history.
    pub fn advance(run: &mut JobRun, next: RunState) -> Result<(), RunError> {
        if !Self::allows(run.state, next) {
            return Err(RunError::InvalidTransition {
                from: run.state,
                to: next,
            });
        }
        run.state_history.push(run.state);
        run.state = next;
        if next.is_terminal() {
            run.finished_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}
