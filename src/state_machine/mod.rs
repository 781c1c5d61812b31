mod run;
mod state;

pub use run::{JobRun, ProducerOutcome, ReportedError, RunReport};
pub use state::{RunState, StateMachine};
