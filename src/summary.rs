//! Human-readable size report of a run's output.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::package::{collect_files, ArchiveEntry};

/// Sizes of everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub files: Vec<ArchiveEntry>,
    pub total_bytes: u64,
    pub archive_bytes: Option<u64>,
    pub expected_file: String,
    pub expected_file_present: bool,
    /// Problems met while building the report.
    pub notes: Vec<String>,
}

impl Summary {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Report per-file and aggregate sizes of `output_dir` and the archive size.
///
/// Never fails: a missing expected file or an unreadable directory is
/// recorded in the summary instead.
pub fn summarize(output_dir: &Path, expected_file: &str, archive: Option<&Path>) -> Summary {
    let mut notes = Vec::new();

    let files: Vec<ArchiveEntry> = match collect_files(output_dir) {
        Ok(files) => files
            .into_iter()
            .filter_map(|(path, abs)| match abs.metadata() {
                Ok(meta) => Some(ArchiveEntry {
                    path,
                    size: meta.len(),
                }),
                Err(e) => {
                    notes.push(format!("could not stat {path}: {e}"));
                    None
                }
            })
            .collect(),
        Err(e) => {
            notes.push(format!("could not list {}: {e}", output_dir.display()));
            Vec::new()
        }
    };

    let archive_bytes = archive.and_then(|path| match path.metadata() {
        Ok(meta) => Some(meta.len()),
        Err(e) => {
            notes.push(format!("could not stat archive {}: {e}", path.display()));
            None
        }
    });

    let expected_file_present = output_dir.join(expected_file).is_file();
    if !expected_file_present {
        notes.push(format!("expected file `{expected_file}` was not produced"));
    }

    Summary {
        total_bytes: files.iter().map(|f| f.size).sum(),
        files,
        archive_bytes,
        expected_file: expected_file.to_string(),
        expected_file_present,
        notes,
    }
}

/// Format a byte count the way `du -h` does.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Output files ({}):", self.file_count())?;
        for file in &self.files {
            writeln!(f, "  {:>8}  {}", human_bytes(file.size), file.path)?;
        }
        writeln!(f, "Total output size: {} ({} bytes)", human_bytes(self.total_bytes), self.total_bytes)?;
        match self.archive_bytes {
            Some(size) => writeln!(f, "Archive size: {} ({size} bytes)", human_bytes(size))?,
            None => writeln!(f, "Archive size: n/a")?,
        }
        if self.expected_file_present {
            writeln!(f, "Expected file `{}`: present", self.expected_file)?;
        } else {
            writeln!(f, "Expected file `{}`: MISSING", self.expected_file)?;
        }
        for note in &self.notes {
            writeln!(f, "Note: {note}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn two_file_scenario_totals_eight_bytes() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("output");
        fs::create_dir_all(out.join("b")).unwrap();
        fs::write(out.join("a.txt"), b"hello").unwrap();
        fs::write(out.join("b/c.txt"), b"abc").unwrap();
        let archive = tmp.path().join("out.zip");
        crate::package::package(&out, &archive).unwrap();

        let summary = summarize(&out, "a.txt", Some(&archive));
        assert_eq!(summary.file_count(), 2);
        assert_eq!(summary.total_bytes, 8);
        assert!(summary.archive_bytes.unwrap() > 0);
        assert!(summary.expected_file_present);
        assert!(summary.notes.is_empty());
    }

    #[test]
    fn missing_expected_file_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let summary = summarize(tmp.path(), "awm_scraped_data.xlsx", None);

        assert!(!summary.expected_file_present);
        assert_eq!(summary.total_bytes, 0);
        assert!(summary.to_string().contains("`awm_scraped_data.xlsx`: MISSING"));
        assert_eq!(summary.notes.len(), 1);
    }

    #[test]
    fn unreadable_directory_becomes_note() {
        let tmp = TempDir::new().unwrap();
        let summary = summarize(&tmp.path().join("gone"), "x.xlsx", Some(&tmp.path().join("gone.zip")));
        assert!(summary.files.is_empty());
        assert!(summary.archive_bytes.is_none());
        assert_eq!(summary.notes.len(), 3);
    }

    #[test]
    fn human_bytes_formatting() {
        assert_eq!(human_bytes(0), "0B");
        assert_eq!(human_bytes(1023), "1023B");
        assert_eq!(human_bytes(1536), "1.5K");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0M");
    }
}
