//! Provisioning of the producer's pinned dependency set.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RunError;

/// Installer command plus the fixed package list it installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Program and leading arguments, e.g. `["pip", "install"]`.
    #[serde(default = "default_installer")]
    pub installer: Vec<String>,

    /// Version-pinned requirements, e.g. `requests==2.31.0`.
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
}

fn default_installer() -> Vec<String> {
    vec!["pip".to_string(), "install".to_string()]
}

fn default_packages() -> Vec<String> {
    [
        "requests==2.31.0",
        "beautifulsoup4==4.12.2",
        "pandas==2.1.4",
        "openpyxl==3.1.2",
        "lxml==4.9.3",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            installer: default_installer(),
            packages: default_packages(),
        }
    }
}

/// A requirement is pinned when it names an exact version or a direct reference.
fn is_pinned(requirement: &str) -> bool {
    match requirement.split_once("==") {
        Some((name, version)) => !name.trim().is_empty() && !version.trim().is_empty(),
        None => requirement.contains(" @ "),
    }
}

impl EnvironmentSpec {
    /// Check that every package is pinned and an installer is configured.
    pub fn validate(&self) -> Result<(), RunError> {
        let unpinned: Vec<&str> = self
            .packages
            .iter()
            .map(String::as_str)
            .filter(|p| !is_pinned(p))
            .collect();
        if !unpinned.is_empty() {
            return Err(RunError::Environment(format!(
                "unpinned requirements: {}",
                unpinned.join(", ")
            )));
        }
        if !self.packages.is_empty() && self.installer.is_empty() {
            return Err(RunError::Environment("no installer configured".into()));
        }
        Ok(())
    }
}

/// Install the fixed dependency set, returning the descriptor recorded on the run.
///
/// Any failure is fatal to the run; nothing is retried.
pub async fn provision_environment(spec: &EnvironmentSpec) -> Result<Vec<String>, RunError> {
    spec.validate()?;
    if spec.packages.is_empty() {
        debug!("no packages to install");
        return Ok(Vec::new());
    }

    let (program, leading) = spec
        .installer
        .split_first()
        .ok_or_else(|| RunError::Environment("no installer configured".into()))?;

    info!(installer = %program, packages = spec.packages.len(), "provisioning environment");
    let output = Command::new(program)
        .args(leading)
        .args(&spec.packages)
        .output()
        .await
        .map_err(|e| RunError::Environment(format!("failed to start `{program}`: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(RunError::Environment(format!(
            "`{program}` exited with {}: {}",
            output.status,
            tail.join(" | ")
        )));
    }

    Ok(spec.packages.clone())
}
