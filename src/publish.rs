//! Local artifact store: published files plus retention metadata.
//!
//! Each artifact lives in `<root>/<name>/` next to an `artifact.json` sidecar
//! describing it. Expired artifacts are removed by [`ArtifactStore::prune`].

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::RunError;

const METADATA_FILE: &str = "artifact.json";

/// A request to publish one file under a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub name: String,
    pub run_number: u64,
    pub source: PathBuf,
    pub retention_days: u32,
}

/// Metadata recorded for a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub run_number: u64,
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
    pub retention_days: u32,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArtifactMeta {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Directory-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `spec.source` into the store and record its metadata.
    ///
    /// Fails with [`RunError::MissingSource`] when the source file does not
    /// exist and with [`RunError::Publish`] when the name is already taken.
    pub fn publish(&self, spec: &ArtifactSpec) -> Result<ArtifactMeta, RunError> {
        self.publish_at(spec, Utc::now())
    }

    fn publish_at(&self, spec: &ArtifactSpec, now: DateTime<Utc>) -> Result<ArtifactMeta, RunError> {
        if !spec.source.is_file() {
            return Err(RunError::MissingSource(spec.source.clone()));
        }
        let publish_err = |reason: String| RunError::Publish {
            artifact: spec.name.clone(),
            reason,
        };

        let file_name = spec
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| publish_err("source has no file name".into()))?;

        let expires_at = now
            .checked_add_signed(Duration::days(i64::from(spec.retention_days)))
            .ok_or_else(|| publish_err(format!("retention of {} days is out of range", spec.retention_days)))?;

        fs::create_dir_all(&self.root).map_err(|e| publish_err(e.to_string()))?;
        let dir = self.root.join(&spec.name);
        fs::create_dir(&dir).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => publish_err("an artifact with this name already exists".into()),
            _ => publish_err(e.to_string()),
        })?;

        let written = copy_with_digest(&spec.source, &dir.join(&file_name)).and_then(|(size, sha256)| {
            let meta = ArtifactMeta {
                name: spec.name.clone(),
                run_number: spec.run_number,
                file_name,
                size,
                sha256,
                retention_days: spec.retention_days,
                published_at: now,
                expires_at,
            };
            let json = serde_json::to_string_pretty(&meta)?;
            fs::write(dir.join(METADATA_FILE), json)?;
            Ok(meta)
        });

        // Leave no metadata-less directory behind to shadow the name.
        let meta = match written {
            Ok(meta) => meta,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(path = %dir.display(), "failed to remove partial artifact: {cleanup}");
                }
                return Err(publish_err(e.to_string()));
            }
        };

        info!(artifact = %meta.name, size = meta.size, expires_at = %meta.expires_at, "published artifact");
        Ok(meta)
    }

    /// All artifacts with readable metadata, ordered by run number then name.
    pub fn list(&self) -> Result<Vec<ArtifactMeta>, RunError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path().join(METADATA_FILE);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(RunError::from)
                .and_then(|s| serde_json::from_str::<ArtifactMeta>(&s).map_err(RunError::from))
            {
                Ok(meta) => artifacts.push(meta),
                Err(e) => warn!(path = %path.display(), "skipping unreadable artifact metadata: {e}"),
            }
        }
        artifacts.sort_by(|a, b| (a.run_number, &a.name).cmp(&(b.run_number, &b.name)));
        Ok(artifacts)
    }

    /// Highest run number present in the store, or 0 when empty.
    pub fn latest_run_number(&self) -> Result<u64, RunError> {
        Ok(self.list()?.iter().map(|a| a.run_number).max().unwrap_or(0))
    }

    /// Delete every artifact whose retention period has elapsed at `now`.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<Vec<ArtifactMeta>, RunError> {
        let mut removed = Vec::new();
        for meta in self.list()? {
            if meta.is_expired(now) {
                fs::remove_dir_all(self.root.join(&meta.name))?;
                info!(artifact = %meta.name, "removed expired artifact");
                removed.push(meta);
            }
        }
        Ok(removed)
    }
}

fn copy_with_digest(source: &Path, dest: &Path) -> io::Result<(u64, String)> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }
    writer.flush()?;
    Ok((size, format!("{:x}", hasher.finalize())))
}
