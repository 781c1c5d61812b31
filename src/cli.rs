//! Command-line interface built on clap.
//!
//! [`Cli`] carries the global flags (`--config`, `--time-budget`,
//! `--verbose`) and the [`Command`] to execute.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// batchrun — scheduled batch jobs with packaged, retained artifacts.
#[derive(Debug, Parser)]
#[command(name = "batchrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (default: ./batchrun.toml if present).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Override the producer time budget, in seconds.
    #[arg(long, global = true)]
    pub time_budget: Option<u64>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Trigger one run now.
    Run {
        /// Print the full run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run on the configured cron schedule until interrupted.
    Schedule {
        /// Fire only the next scheduled run, then exit.
        #[arg(long)]
        once: bool,
    },

    /// Zip a directory the same way a run packages its output.
    Package {
        /// Directory to archive.
        dir: PathBuf,
        /// Archive to write.
        archive: PathBuf,
    },

    /// Print the size summary of an output directory.
    Summary {
        dir: PathBuf,

        /// File expected to be present (default: from config).
        #[arg(long)]
        expected: Option<String>,

        /// Archive whose size to report.
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// List published artifacts and their expiry.
    Artifacts,

    /// Delete artifacts past their retention period.
    Prune,

    /// Print the effective configuration.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["batchrun", "run", "--json"]);
        assert!(matches!(cli.command, Command::Run { json: true }));
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "batchrun",
            "--config",
            "jobs/scrape.toml",
            "--time-budget",
            "300",
            "--verbose",
            "schedule",
            "--once",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("jobs/scrape.toml")));
        assert_eq!(cli.time_budget, Some(300));
        assert!(matches!(cli.command, Command::Schedule { once: true }));
    }

    #[test]
    fn cli_parses_summary_subcommand() {
        let cli = Cli::parse_from(["batchrun", "summary", "output", "--expected", "data.xlsx"]);
        match cli.command {
            Command::Summary { dir, expected, archive } => {
                assert_eq!(dir, PathBuf::from("output"));
                assert_eq!(expected.as_deref(), Some("data.xlsx"));
                assert!(archive.is_none());
            }
            _ => panic!("expected Summary command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
