mod cli;
mod config;
mod environment;
mod error;
mod orchestrator;
mod package;
mod producer;
mod publish;
mod schedule;
mod scheduler;
mod state_machine;
mod summary;
mod trigger;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use config::BatchConfig;
use orchestrator::BatchOrchestrator;
use publish::ArtifactStore;
use trigger::Trigger;
use ui::RunProgress;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "batchrun=debug" } else { "batchrun=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

/// Execute the chosen command. `Ok(false)` means the run itself failed.
async fn run(cli: Cli) -> Result<bool> {
    let mut config = match &cli.config {
        Some(path) => BatchConfig::load_from(path, true)?,
        None => BatchConfig::load()?,
    };
    if let Some(secs) = cli.time_budget {
        anyhow::ensure!(secs > 0, "--time-budget must be positive");
        config.time_budget_secs = secs;
    }

    match cli.command {
        Command::Run { json } => {
            let orch = BatchOrchestrator::new(config)?;
            let progress = RunProgress::start(&format!("Running {}", orch.config().producer.program));
            let report = orch.execute(Trigger::Manual, &orch.config().producer).await;
            progress.complete(&report);
            if json {
                progress.print_json(&report);
            }
            println!("Artifacts stored in {}", orch.store().root().display());
            Ok(report.is_success())
        }
        Command::Schedule { once } => {
            let cron = config.cron()?;
            let orch = BatchOrchestrator::new(config)?;
            if once {
                let report = scheduler::run_next(&orch, &orch.config().producer, &cron).await?;
                RunProgress::default().complete(&report);
                return Ok(report.is_success());
            }

            let producer = Arc::new(orch.config().producer.clone());
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for ctrl-c: {e}");
                    std::future::pending::<()>().await;
                }
            };
            let reports = scheduler::run_schedule(Arc::new(orch), producer, cron, shutdown).await?;
            let progress = RunProgress::default();
            for report in &reports {
                progress.complete(report);
            }
            Ok(reports.iter().all(|r| r.is_success()))
        }
        Command::Package { dir, archive } => {
            let manifest = package::package(&dir, &archive)?;
            println!(
                "Wrote {} ({} entries, {})",
                manifest.archive.display(),
                manifest.entries.len(),
                summary::human_bytes(manifest.archive_bytes)
            );
            Ok(true)
        }
        Command::Summary { dir, expected, archive } => {
            let expected = expected.unwrap_or(config.expected_file);
            print!("{}", summary::summarize(&dir, &expected, archive.as_deref()));
            Ok(true)
        }
        Command::Artifacts => {
            let store = ArtifactStore::new(config.artifact_dir);
            RunProgress::default().print_artifacts(&store.list()?);
            Ok(true)
        }
        Command::Prune => {
            let store = ArtifactStore::new(config.artifact_dir);
            let removed = store.prune(chrono::Utc::now())?;
            println!("Removed {} expired artifact(s).", removed.len());
            Ok(true)
        }
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
            print!("{rendered}");
            Ok(true)
        }
    }
}
