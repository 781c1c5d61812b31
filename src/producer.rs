//! The producer: an external process that writes files under an output root.
//!
//! The orchestrator only relies on the [`Producer`] contract: given a
//! pre-created output directory, spawn something that writes files there and
//! exits with a status.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::state_machine::ProducerOutcome;

/// Environment variable through which producers learn their output root.
pub const OUTPUT_DIR_ENV: &str = "BATCHRUN_OUTPUT_DIR";

/// Anything that can be started against an output directory.
pub trait Producer: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Start the producer. `workspace` is the run's scratch directory and
    /// `output_dir` the directory it must write into.
    fn spawn(&self, workspace: &Path, output_dir: &Path) -> io::Result<Child>;
}

/// A producer defined by a program and its arguments.
///
/// Arguments may contain `{output_dir}`, `{workspace}` and `{project_dir}`
/// placeholders. Without an explicit `cwd` the process runs inside the run
/// workspace, so a producer that writes to a relative `output/` directory
/// lands in the right place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProducer {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_program() -> String {
    "python".to_string()
}

fn default_args() -> Vec<String> {
    vec!["{project_dir}/awm_scraper.py".to_string()]
}

impl Default for CommandProducer {
    fn default() -> Self {
        Self::new("python", &["{project_dir}/awm_scraper.py"])
    }
}

impl CommandProducer {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
        }
    }

    fn expand(&self, arg: &str, workspace: &Path, output_dir: &Path) -> String {
        let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        arg.replace("{output_dir}", &output_dir.to_string_lossy())
            .replace("{workspace}", &workspace.to_string_lossy())
            .replace("{project_dir}", &project_dir.to_string_lossy())
    }
}

impl Producer for CommandProducer {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn(&self, workspace: &Path, output_dir: &Path) -> io::Result<Child> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| self.expand(a, workspace, output_dir))
            .collect();

        Command::new(&self.program)
            .args(args)
            .env(OUTPUT_DIR_ENV, output_dir)
            .current_dir(self.cwd.as_deref().unwrap_or(workspace))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Relay a child's output stream into the log, line by line.
fn forward_lines<R>(stream: Option<R>, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else { return };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "batchrun::producer", stream = stream_name, "{line}");
        }
    });
}

/// Run the producer to completion, or kill it once `budget` elapses.
///
/// Termination is forced (`SIGKILL` on Unix). After the kill the call waits at
/// most `grace` for the process to be reaped, so it always returns within
/// `budget + grace` plus scheduling slack.
pub async fn run_producer<P: Producer + ?Sized>(
    producer: &P,
    workspace: &Path,
    output_dir: &Path,
    budget: Duration,
    grace: Duration,
) -> ProducerOutcome {
    info!(producer = %producer.describe(), budget_secs = budget.as_secs(), "starting producer");
    let mut child = match producer.spawn(workspace, output_dir) {
        Ok(child) => child,
        Err(e) => {
            error!("failed to start producer: {e}");
            return ProducerOutcome::Failed { code: None };
        }
    };
    forward_lines(child.stdout.take(), "stdout");
    forward_lines(child.stderr.take(), "stderr");

    match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            debug!(%status, "producer finished");
            ProducerOutcome::Succeeded
        }
        Ok(Ok(status)) => {
            warn!(%status, "producer exited unsuccessfully");
            ProducerOutcome::Failed {
                code: status.code(),
            }
        }
        Ok(Err(e)) => {
            error!("failed waiting for producer: {e}");
            ProducerOutcome::Failed { code: None }
        }
        Err(_) => {
            warn!(budget_secs = budget.as_secs(), "producer exceeded time budget, killing");
            if let Err(e) = child.start_kill() {
                error!("failed to kill producer: {e}");
            }
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                error!(grace_secs = grace.as_secs(), "producer not reaped within grace period");
            }
            ProducerOutcome::TimedOut {
                budget_secs: budget.as_secs(),
            }
        }
    }
}
