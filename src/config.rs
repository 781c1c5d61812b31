//! Runner configuration loaded from `batchrun.toml`.
//!
//! [`BatchConfig`] holds every tunable. Missing keys fall back to defaults
//! matching the weekly scrape job. `BATCHRUN_ARTIFACT_DIR` overrides the
//! artifact directory from the file.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentSpec;
use crate::producer::CommandProducer;
use crate::schedule::CronSchedule;

pub const DEFAULT_CONFIG_FILE: &str = "batchrun.toml";

/// Upper bound on `retention_days` (a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Top-level configuration loaded from `batchrun.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Cron expression for scheduled runs (UTC).
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Parent of the per-run scratch directories.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Where published artifacts are stored.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Wall-clock budget for the producer step.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,

    /// How long to wait for a killed producer to be reaped.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// File inside the output directory published on its own.
    #[serde(default = "default_expected_file")]
    pub expected_file: String,

    #[serde(default = "default_data_artifact_prefix")]
    pub data_artifact_prefix: String,

    #[serde(default = "default_archive_artifact_prefix")]
    pub archive_artifact_prefix: String,

    /// Keep the run's scratch directory after publishing.
    #[serde(default)]
    pub keep_workdir: bool,

    #[serde(default)]
    pub producer: CommandProducer,

    #[serde(default)]
    pub environment: EnvironmentSpec,
}

fn default_schedule() -> String {
    "0 2 * * 0".to_string()
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".batchrun/work")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".batchrun/artifacts")
}

// Six hours, the usual ceiling for a hosted CI job.
fn default_time_budget_secs() -> u64 {
    6 * 60 * 60
}

fn default_kill_grace_secs() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    90
}

fn default_expected_file() -> String {
    "awm_scraped_data.xlsx".to_string()
}

fn default_data_artifact_prefix() -> String {
    "awm-scraped-data".to_string()
}

fn default_archive_artifact_prefix() -> String {
    "awm-complete-archive".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            work_root: default_work_root(),
            artifact_dir: default_artifact_dir(),
            time_budget_secs: default_time_budget_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            retention_days: default_retention_days(),
            expected_file: default_expected_file(),
            data_artifact_prefix: default_data_artifact_prefix(),
            archive_artifact_prefix: default_archive_artifact_prefix(),
            keep_workdir: false,
            producer: CommandProducer::default(),
            environment: EnvironmentSpec::default(),
        }
    }
}

impl BatchConfig {
    /// Load `batchrun.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE), false)
    }

    /// Load from `path`. With `required`, a missing file is an error.
    pub fn load_from(path: &Path, required: bool) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&contents).with_context(|| format!("invalid config in {}", path.display()))?
        } else if required {
            anyhow::bail!("config file {} not found", path.display());
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("BATCHRUN_ARTIFACT_DIR") {
            if !dir.is_empty() {
                config.artifact_dir = PathBuf::from(dir);
            }
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: BatchConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cron().context("invalid `schedule`")?;
        anyhow::ensure!(self.time_budget_secs > 0, "`time_budget_secs` must be positive");
        anyhow::ensure!(!self.expected_file.is_empty(), "`expected_file` must not be empty");
        anyhow::ensure!(
            Path::new(&self.expected_file)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir)),
            "`expected_file` must be a relative path inside the output directory"
        );
        anyhow::ensure!(
            self.retention_days <= MAX_RETENTION_DAYS,
            "`retention_days` must be at most {MAX_RETENTION_DAYS}"
        );
        anyhow::ensure!(
            self.data_artifact_prefix != self.archive_artifact_prefix,
            "artifact prefixes must differ"
        );
        Ok(())
    }

    pub fn cron(&self) -> Result<CronSchedule> {
        Ok(self.schedule.parse::<CronSchedule>()?)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}
