//! Terminal output: spinner while a run is in flight, coloured report after.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::publish::ArtifactMeta;
use crate::state_machine::{ProducerOutcome, RunReport, RunState};
use crate::summary::human_bytes;

/// Visual progress for one run in the terminal.
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            pb: ProgressBar::hidden(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl RunProgress {
    /// Start a spinner with `message`.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self { pb, ..Self::default() }
    }

    /// Stop the spinner and print the run outcome with its artifacts.
    pub fn complete(&self, report: &RunReport) {
        self.pb.finish_and_clear();

        let mark = if report.is_success() {
            self.green.apply_to("✓")
        } else if report.final_state == RunState::Published {
            self.yellow.apply_to("!")
        } else {
            self.red.apply_to("✗")
        };
        println!(
            "  {mark} Run #{} {} ({})",
            report.run_number,
            report.final_state,
            describe_producer(report.producer.as_ref())
        );

        for artifact in &report.artifacts {
            println!("    {}", self.green.apply_to(describe_artifact(artifact)));
        }
        for err in &report.errors {
            println!("    {} {}: {}", self.red.apply_to("✗"), err.kind, err.message);
        }
        if report.has_errors_of("PublishError") {
            println!(
                "    {}",
                self.yellow.apply_to("some artifacts were not published; see errors above")
            );
        }
        if let Some(summary) = &report.summary {
            println!();
            print!("{summary}");
        }
    }

    /// Print the full report as pretty JSON.
    pub fn print_json(&self, report: &RunReport) {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }

    /// Print a table of published artifacts.
    pub fn print_artifacts(&self, artifacts: &[ArtifactMeta]) {
        if artifacts.is_empty() {
            println!("No artifacts published.");
            return;
        }
        for artifact in artifacts {
            println!("  {}", describe_artifact(artifact));
        }
    }
}

fn describe_producer(outcome: Option<&ProducerOutcome>) -> String {
    match outcome {
        None => "producer not started".to_string(),
        Some(ProducerOutcome::Succeeded) => "producer succeeded".to_string(),
        Some(ProducerOutcome::Failed { code: Some(code) }) => format!("producer exited with {code}"),
        Some(ProducerOutcome::Failed { code: None }) => "producer failed".to_string(),
        Some(ProducerOutcome::TimedOut { budget_secs }) => {
            format!("producer killed after {budget_secs}s")
        }
    }
}

fn describe_artifact(artifact: &ArtifactMeta) -> String {
    format!(
        "{} → {} ({}, expires {})",
        artifact.name,
        artifact.file_name,
        human_bytes(artifact.size),
        artifact.expires_at.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn producer_descriptions() {
        assert_eq!(describe_producer(None), "producer not started");
        assert_eq!(
            describe_producer(Some(&ProducerOutcome::Failed { code: Some(2) })),
            "producer exited with 2"
        );
        assert_eq!(
            describe_producer(Some(&ProducerOutcome::TimedOut { budget_secs: 60 })),
            "producer killed after 60s"
        );
    }

    #[test]
    fn artifact_description_includes_expiry() {
        let published_at = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let artifact = ArtifactMeta {
            name: "awm-complete-archive-3".into(),
            run_number: 3,
            file_name: "awm-complete-archive-3.zip".into(),
            size: 2048,
            sha256: String::new(),
            retention_days: 90,
            published_at,
            expires_at: published_at + chrono::Duration::days(90),
        };
        assert_eq!(
            describe_artifact(&artifact),
            "awm-complete-archive-3 → awm-complete-archive-3.zip (2.0K, expires 2027-01-17)"
        );
    }
}
