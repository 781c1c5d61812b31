use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, info_span, warn, Instrument};

use crate::config::BatchConfig;
use crate::environment;
use crate::error::RunError;
use crate::package::{self, PackageManifest};
use crate::producer::{self, Producer};
use crate::publish::{ArtifactMeta, ArtifactSpec, ArtifactStore};
use crate::state_machine::{
    JobRun, ProducerOutcome, ReportedError, RunReport, RunState, StateMachine,
};
use crate::summary::{self, Summary};
use crate::trigger::{RunCounter, Trigger};

/// Scratch directories owned by one run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    pub root: PathBuf,
    pub output_dir: PathBuf,
}

impl RunWorkspace {
    /// Create `<work_root>/run-<n>/output`, replacing any leftovers.
    pub fn create(work_root: &Path, run_number: u64) -> std::io::Result<Self> {
        let root = work_root.join(format!("run-{run_number}"));
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        let output_dir = root.join("output");
        fs::create_dir_all(&output_dir)?;
        Ok(Self { root, output_dir })
    }

    pub fn discard(self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(path = %self.root.display(), "failed to remove run workspace: {e}");
        }
    }
}

/// Drives runs through provision → produce → package → publish.
pub struct BatchOrchestrator {
    config: BatchConfig,
    counter: RunCounter,
    store: ArtifactStore,
}

impl BatchOrchestrator {
    /// Build an orchestrator whose run numbers continue after the highest one
    /// already in the artifact store.
    pub fn new(config: BatchConfig) -> Result<Self, RunError> {
        let store = ArtifactStore::new(config.artifact_dir.clone());
        let last = store.latest_run_number()?;
        Ok(Self {
            config,
            counter: RunCounter::starting_after(last),
            store,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn data_artifact_name(&self, run_number: u64) -> String {
        format!("{}-{run_number}", self.config.data_artifact_prefix)
    }

    pub fn archive_artifact_name(&self, run_number: u64) -> String {
        format!("{}-{run_number}", self.config.archive_artifact_prefix)
    }

    /// Start a new run attempt with a fresh run number. Never fails.
    pub fn trigger(&self, source: Trigger) -> JobRun {
        let run = JobRun::new(self.counter.allocate(), source, self.config.time_budget());
        info!(run_number = run.run_number, trigger = %run.trigger, "run triggered");
        run
    }

    /// Install the pinned dependency set and create the run workspace.
    pub async fn provision_environment(&self, run: &mut JobRun) -> Result<RunWorkspace, RunError> {
        advance(run, RunState::Provisioning);
        run.environment = environment::provision_environment(&self.config.environment).await?;
        let workspace = RunWorkspace::create(&self.config.work_root, run.run_number).map_err(|e| {
            RunError::Environment(format!("failed to create run workspace: {e}"))
        })?;
        Ok(workspace)
    }

    /// Run the producer within the configured time budget.
    pub async fn run_producer<P: Producer + ?Sized>(
        &self,
        run: &mut JobRun,
        producer: &P,
        workspace: &RunWorkspace,
    ) -> ProducerOutcome {
        advance(run, RunState::Running);
        let outcome = producer::run_producer(
            producer,
            &workspace.root,
            &workspace.output_dir,
            run_budget(run),
            self.config.kill_grace(),
        )
        .await;
        advance(run, outcome.state());
        run.producer = Some(outcome.clone());
        outcome
    }

    /// Archive whatever is in the output directory right now.
    pub async fn package(&self, run: &JobRun, workspace: &RunWorkspace) -> Result<PackageManifest, RunError> {
        let output_dir = workspace.output_dir.clone();
        let archive = workspace
            .root
            .join(format!("{}.zip", self.archive_artifact_name(run.run_number)));

        tokio::task::spawn_blocking(move || package::package(&output_dir, &archive))
            .await
            .map_err(|e| RunError::Packaging(format!("packaging task failed: {e}")))?
    }

    pub fn publish(&self, spec: &ArtifactSpec) -> Result<ArtifactMeta, RunError> {
        self.store.publish(spec)
    }

    pub fn summarize(&self, workspace: &RunWorkspace, archive: Option<&Path>) -> Summary {
        summary::summarize(&workspace.output_dir, &self.config.expected_file, archive)
    }

    /// Run one full pipeline for `source` and return its terminal report.
    pub async fn execute<P: Producer + ?Sized>(&self, source: Trigger, producer: &P) -> RunReport {
        let mut run = self.trigger(source);
        let span = info_span!("run", run_number = run.run_number, attempt = %run.attempt_id);
        async move {
            let report = self.drive(&mut run, producer).await;
            info!(final_state = %report.final_state, errors = report.errors.len(), "run finished");
            report
        }
        .instrument(span)
        .await
    }

    async fn drive<P: Producer + ?Sized>(&self, run: &mut JobRun, producer: &P) -> RunReport {
        let mut errors = Vec::new();

        let workspace = match self.provision_environment(run).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("provisioning failed: {e}");
                errors.push(ReportedError::from(&e));
                advance(run, RunState::Abandoned);
                return RunReport::from_run(run, Vec::new(), errors, None);
            }
        };

        let outcome = self.run_producer(run, producer, &workspace).await;
        if let Some(e) = outcome.as_error() {
            warn!("{e}; packaging partial output");
            errors.push(ReportedError::from(&e));
        }

        let manifest = match self.package(run, &workspace).await {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("packaging failed: {e}");
                errors.push(ReportedError::from(&e));
                let summary = self.summarize(&workspace, None);
                advance(run, RunState::Abandoned);
                self.finish_workspace(workspace);
                return RunReport::from_run(run, Vec::new(), errors, Some(summary));
            }
        };
        info!(entries = manifest.entries.len(), bytes = manifest.archive_bytes, "packaged output");
        advance(run, RunState::Packaged);

        let specs = [
            ArtifactSpec {
                name: self.data_artifact_name(run.run_number),
                run_number: run.run_number,
                source: workspace.output_dir.join(&self.config.expected_file),
                retention_days: self.config.retention_days,
            },
            ArtifactSpec {
                name: self.archive_artifact_name(run.run_number),
                run_number: run.run_number,
                source: manifest.archive.clone(),
                retention_days: self.config.retention_days,
            },
        ];

        // Each artifact is published independently of the other's result.
        let mut artifacts = Vec::new();
        for spec in &specs {
            match self.publish(spec) {
                Ok(meta) => artifacts.push(meta),
                Err(e) => {
                    error!(artifact = %spec.name, "publish failed: {e}");
                    errors.push(ReportedError::from(&e));
                }
            }
        }

        let summary = self.summarize(&workspace, Some(&manifest.archive));
        if !summary.expected_file_present {
            warn!(file = %self.config.expected_file, "expected file missing from output");
        }
        advance(run, RunState::Published);
        self.finish_workspace(workspace);

        RunReport::from_run(run, artifacts, errors, Some(summary))
    }

    fn finish_workspace(&self, workspace: RunWorkspace) {
        if self.config.keep_workdir {
            info!(path = %workspace.root.display(), "keeping run workspace");
        } else {
            workspace.discard();
        }
    }
}

fn run_budget(run: &JobRun) -> std::time::Duration {
    std::time::Duration::from_secs(run.time_budget_secs)
}

// Transitions here follow the pipeline order, so a rejection is a bug.
fn advance(run: &mut JobRun, next: RunState) {
    if let Err(e) = StateMachine::advance(run, next) {
        error!("{e}");
    }
}
