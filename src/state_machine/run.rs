use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;
use crate::error::RunError;
use crate::publish::ArtifactMeta;
use crate::summary::Summary;
use crate::trigger::Trigger;

/// How the producer step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut { budget_secs: u64 },
}

impl ProducerOutcome {
    /// The run state this outcome maps to.
    pub fn state(&self) -> RunState {
        match self {
            ProducerOutcome::Succeeded => RunState::Succeeded,
            ProducerOutcome::Failed { .. } => RunState::Failed,
            ProducerOutcome::TimedOut { .. } => RunState::TimedOut,
        }
    }

    pub fn as_error(&self) -> Option<RunError> {
        match self {
            ProducerOutcome::Succeeded => None,
            ProducerOutcome::Failed { code } => Some(RunError::ProducerFailure { code: *code }),
            ProducerOutcome::TimedOut { budget_secs } => Some(RunError::ProducerTimeout {
                budget_secs: *budget_secs,
            }),
        }
    }
}

/// A single execution of the batch job, from trigger to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Monotonic number used in artifact names.
    pub run_number: u64,
    /// Globally unique id for log correlation.
    pub attempt_id: Uuid,
    pub trigger: Trigger,
    pub time_budget_secs: u64,
    /// Pinned dependency set the environment was provisioned with.
    pub environment: Vec<String>,
    pub state: RunState,
    pub state_history: Vec<RunState>,
    pub producer: Option<ProducerOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(run_number: u64, trigger: Trigger, time_budget: Duration) -> Self {
        Self {
            run_number,
            attempt_id: Uuid::new_v4(),
            trigger,
            time_budget_secs: time_budget.as_secs(),
            environment: Vec::new(),
            state: RunState::Pending,
            state_history: Vec::new(),
            producer: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// A failure surfaced in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    pub kind: String,
    pub message: String,
}

impl From<&RunError> for ReportedError {
    fn from(err: &RunError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Terminal report produced at the end of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_number: u64,
    pub attempt_id: Uuid,
    pub trigger: Trigger,
    pub final_state: RunState,
    pub state_transitions: Vec<RunState>,
    pub producer: Option<ProducerOutcome>,
    pub artifacts: Vec<ArtifactMeta>,
    pub errors: Vec<ReportedError>,
    pub summary: Option<Summary>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunReport {
    pub fn from_run(
        run: &JobRun,
        artifacts: Vec<ArtifactMeta>,
        errors: Vec<ReportedError>,
        summary: Option<Summary>,
    ) -> Self {
        let completed_at = run.finished_at.unwrap_or_else(Utc::now);
        let mut transitions = run.state_history.clone();
        transitions.push(run.state);

        Self {
            run_number: run.run_number,
            attempt_id: run.attempt_id,
            trigger: run.trigger.clone(),
            final_state: run.state,
            state_transitions: transitions,
            producer: run.producer.clone(),
            artifacts,
            errors,
            summary,
            started_at: run.started_at,
            completed_at,
            duration_ms: (completed_at - run.started_at).num_milliseconds(),
        }
    }

    /// Whether the process should exit with status 0.
    ///
    /// Publish failures alone do not fail the run; environment, producer and
    /// packaging failures do.
    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Published
            && matches!(self.producer, Some(ProducerOutcome::Succeeded))
    }

    pub fn has_errors_of(&self, kind: &str) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}
