use std::path::PathBuf;

use thiserror::Error;

use crate::schedule::ScheduleError;
use crate::state_machine::RunState;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Producer exited with status {code:?}")]
    ProducerFailure { code: Option<i32> },

    #[error("Producer exceeded its time budget of {budget_secs}s and was killed")]
    ProducerTimeout { budget_secs: u64 },

    #[error("Packaging error: {0}")]
    Packaging(String),

    #[error("Publish error for artifact `{artifact}`: {reason}")]
    Publish { artifact: String, reason: String },

    #[error("Artifact source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunError {
    /// Stable kind label used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Environment(_) => "EnvironmentError",
            RunError::ProducerFailure { .. } => "ProducerFailure",
            RunError::ProducerTimeout { .. } => "ProducerTimeout",
            RunError::Packaging(_) => "PackagingError",
            RunError::Publish { .. } | RunError::MissingSource(_) => "PublishError",
            RunError::InvalidTransition { .. } => "InvalidTransition",
            RunError::Schedule(_) => "ScheduleError",
            RunError::Io(_) => "IoError",
            RunError::Json(_) => "FormatError",
        }
    }
}
