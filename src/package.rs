//! Deterministic zip packaging of an output directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::RunError;

/// One file stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path relative to the packaged root, `/`-separated.
    pub path: String,
    pub size: u64,
}

/// What [`package`] wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub archive: PathBuf,
    pub entries: Vec<ArchiveEntry>,
    pub archive_bytes: u64,
}

/// Every regular file below `root`, keyed by `/`-separated relative path and
/// sorted by it. Symlinked directories are not followed; symlinks that do not
/// resolve to a regular file are skipped with a warning.
pub fn collect_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(target) if target.is_file() => {}
                    Ok(_) => {
                        warn!(path = %path.display(), "skipping symlink to non-file");
                        continue;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "skipping unresolvable symlink: {e}");
                        continue;
                    }
                }
            } else if !file_type.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(io::Error::other)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push((relative, path));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Compress every file under `output_dir` into a zip at `archive_path`.
///
/// Entries are written in path order with a fixed timestamp and mode, so the
/// same input always produces the same bytes. An empty directory yields a
/// valid archive with zero entries. `archive_path` must lie outside
/// `output_dir`.
pub fn package(output_dir: &Path, archive_path: &Path) -> Result<PackageManifest, RunError> {
    if !output_dir.is_dir() {
        return Err(RunError::Packaging(format!(
            "output directory {} does not exist",
            output_dir.display()
        )));
    }
    if archive_path.starts_with(output_dir) {
        return Err(RunError::Packaging(
            "archive may not be written inside the directory being packaged".into(),
        ));
    }

    let files = collect_files(output_dir).map_err(|e| fail("failed to list output", e))?;
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail("failed to create archive directory", e))?;
    }

    let file = File::create(archive_path).map_err(|e| fail("failed to create archive", e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut entries = Vec::with_capacity(files.len());
    for (relative, path) in files {
        let mut source = File::open(&path).map_err(|e| fail(&format!("failed to read {relative}"), e))?;
        let len = source
            .metadata()
            .map_err(|e| fail(&format!("failed to stat {relative}"), e))?
            .len();
        zip.start_file(relative.as_str(), options.large_file(needs_zip64(len)))
            .map_err(|e| fail(&format!("failed to add {relative}"), e))?;
        let size = io::copy(&mut source, &mut zip)
            .map_err(|e| fail(&format!("failed to compress {relative}"), e))?;
        debug!(path = %relative, size, "archived");
        entries.push(ArchiveEntry {
            path: relative,
            size,
        });
    }

    zip.finish().map_err(|e| fail("failed to finalize archive", e))?;
    let archive_bytes = fs::metadata(archive_path)
        .map_err(|e| fail("failed to stat archive", e))?
        .len();

    Ok(PackageManifest {
        archive: archive_path.to_path_buf(),
        entries,
        archive_bytes,
    })
}

/// Entries of 4 GiB or more need ZIP64 extra fields.
fn needs_zip64(len: u64) -> bool {
    len >= u64::from(u32::MAX)
}

fn fail(what: &str, e: impl std::fmt::Display) -> RunError {
    RunError::Packaging(format!("{what}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn empty_directory_yields_valid_empty_archive() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        fs::create_dir(&out).unwrap();
        let archive = tmp.path().join("archive.zip");

        let manifest = package(&out, &archive).unwrap();
        assert!(manifest.entries.is_empty());
        assert!(manifest.archive_bytes > 0);

        let zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 0);
    }

    #[test]
    fn two_file_scenario() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        write(&out, "a.txt", b"hello");
        write(&out, "b/c.txt", b"abc");
        let archive = tmp.path().join("archive.zip");

        let manifest = package(&out, &archive).unwrap();
        assert_eq!(
            manifest.entries,
            vec![
                ArchiveEntry { path: "a.txt".into(), size: 5 },
                ArchiveEntry { path: "b/c.txt".into(), size: 3 },
            ]
        );

        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        for (name, expected) in [("a.txt", &b"hello"[..]), ("b/c.txt", &b"abc"[..])] {
            let mut entry = zip.by_name(name).unwrap();
            assert_eq!(entry.size(), expected.len() as u64);
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).unwrap();
            assert_eq!(buf, expected);
        }
    }

    #[test]
    fn extracted_contents_are_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        let binary: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        write(&out, "data/raw.bin", &binary);
        write(&out, "data/nested/deep/notes.json", br#"{"pages": 3}"#);
        let archive = tmp.path().join("archive.zip");

        package(&out, &archive).unwrap();

        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        for (rel, path) in collect_files(&out).unwrap() {
            let mut buf = Vec::new();
            zip.by_name(&rel).unwrap().read_to_end(&mut buf).unwrap();
            assert_eq!(buf, fs::read(path).unwrap(), "mismatch for {rel}");
        }
    }

    #[test]
    fn packaging_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        write(&out, "z.txt", b"last");
        write(&out, "a/b.txt", b"first");

        package(&out, &tmp.path().join("one.zip")).unwrap();
        package(&out, &tmp.path().join("two.zip")).unwrap();
        assert_eq!(
            fs::read(tmp.path().join("one.zip")).unwrap(),
            fs::read(tmp.path().join("two.zip")).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        write(&out, "data.xlsx", b"sheet");
        std::os::unix::fs::symlink("/nonexistent/batchrun", out.join("tmp.lock")).unwrap();
        std::os::unix::fs::symlink("data.xlsx", out.join("latest.xlsx")).unwrap();
        let archive = tmp.path().join("archive.zip");

        let manifest = package(&out, &archive).unwrap();
        assert_eq!(
            manifest.entries,
            vec![
                ArchiveEntry { path: "data.xlsx".into(), size: 5 },
                ArchiveEntry { path: "latest.xlsx".into(), size: 5 },
            ]
        );
    }

    #[test]
    fn zip64_only_for_huge_entries() {
        assert!(!needs_zip64(0));
        assert!(!needs_zip64(u64::from(u32::MAX) - 1));
        assert!(needs_zip64(u64::from(u32::MAX)));
        assert!(needs_zip64(8 << 30));
    }

    #[test]
    fn refuses_archive_inside_output() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        fs::create_dir(&out).unwrap();

        let err = package(&out, &out.join("self.zip")).unwrap_err();
        assert_eq!(err.kind(), "PackagingError");
    }

    #[test]
    fn missing_output_dir_is_packaging_error() {
        let tmp = TempDir::new().unwrap();
        let err = package(&tmp.path().join("nope"), &tmp.path().join("a.zip")).unwrap_err();
        assert!(matches!(err, RunError::Packaging(_)));
    }
}
