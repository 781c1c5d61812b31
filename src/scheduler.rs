//! Cron-driven trigger loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::RunError;
use crate::orchestrator::BatchOrchestrator;
use crate::producer::Producer;
use crate::schedule::{CronSchedule, ScheduleError};
use crate::state_machine::RunReport;
use crate::trigger::Trigger;

/// How long to sleep from `now` until `next`; zero if already due.
pub fn delay_until(now: DateTime<Utc>, next: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Wait for the next tick of `cron`, then execute a single run inline.
pub async fn run_next<P>(orch: &BatchOrchestrator, producer: &P, cron: &CronSchedule) -> Result<RunReport, RunError>
where
    P: Producer + ?Sized,
{
    run_next_from(orch, producer, cron, Utc::now()).await
}

async fn run_next_from<P>(
    orch: &BatchOrchestrator,
    producer: &P,
    cron: &CronSchedule,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    P: Producer + ?Sized,
{
    let next = cron
        .next_after(now)
        .ok_or_else(|| ScheduleError::InvalidField {
            field: "schedule",
            value: format!("`{}` never fires", cron.expr()),
        })?;
    info!(next = %next, "waiting for next scheduled run");
    tokio::time::sleep(delay_until(now, next)).await;
    Ok(orch
        .execute(Trigger::Schedule(cron.expr().to_string()), producer)
        .await)
}

/// Fire a run on every tick of `cron` until `shutdown` resolves.
///
/// Each run is spawned on its own task, so a run that overlaps the next tick
/// does not delay it. On shutdown no new runs start; in-flight runs are
/// awaited and all reports are returned in completion order.
pub async fn run_schedule<P, F>(
    orch: Arc<BatchOrchestrator>,
    producer: Arc<P>,
    cron: CronSchedule,
    shutdown: F,
) -> Result<Vec<RunReport>, RunError>
where
    P: Producer + 'static,
    F: Future<Output = ()>,
{
    run_schedule_with_clock(orch, producer, cron, shutdown, Utc::now).await
}

async fn run_schedule_with_clock<P, F, C>(
    orch: Arc<BatchOrchestrator>,
    producer: Arc<P>,
    cron: CronSchedule,
    shutdown: F,
    clock: C,
) -> Result<Vec<RunReport>, RunError>
where
    P: Producer + 'static,
    F: Future<Output = ()>,
    C: Fn() -> DateTime<Utc>,
{
    let mut in_flight: JoinSet<RunReport> = JoinSet::new();
    let mut reports = Vec::new();
    let mut last_fired: Option<DateTime<Utc>> = None;
    tokio::pin!(shutdown);

    loop {
        let now = clock();
        // The wall clock may lag the timer that woke us; never refire a tick.
        let from = last_fired.map_or(now, |fired| now.max(fired));
        let Some(next) = cron.next_after(from) else {
            warn!(schedule = cron.expr(), "schedule never fires again");
            break;
        };
        info!(next = %next, "next scheduled run");

        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, no further runs will start");
                break;
            }
            Some(joined) = in_flight.join_next() => {
                collect(joined, &mut reports);
                continue;
            }
            _ = tokio::time::sleep(delay_until(now, next)) => {}
        }

        last_fired = Some(next);
        let orch = Arc::clone(&orch);
        let producer = Arc::clone(&producer);
        let trigger = Trigger::Schedule(cron.expr().to_string());
        in_flight.spawn(async move { orch.execute(trigger, producer.as_ref()).await });
    }

    while let Some(joined) = in_flight.join_next().await {
        collect(joined, &mut reports);
    }
    Ok(reports)
}

fn collect(joined: Result<RunReport, tokio::task::JoinError>, reports: &mut Vec<RunReport>) {
    match joined {
        Ok(report) => {
            info!(
                run_number = report.run_number,
                final_state = %report.final_state,
                "scheduled run finished"
            );
            reports.push(report);
        }
        Err(e) => error!("scheduled run task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::environment::EnvironmentSpec;
    use crate::producer::CommandProducer;
    use crate::state_machine::RunState;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> BatchConfig {
        BatchConfig {
            work_root: tmp.path().join("work"),
            artifact_dir: tmp.path().join("artifacts"),
            expected_file: "data.xlsx".into(),
            environment: EnvironmentSpec {
                installer: vec!["true".into()],
                packages: Vec::new(),
            },
            ..BatchConfig::default()
        }
    }

    // 50ms before 02:00:00 UTC.
    fn just_before_tick() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 4, 1, 59, 59).unwrap() + chrono::Duration::milliseconds(950)
    }

    #[test]
    fn delay_is_zero_when_due() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(delay_until(now, now - chrono::Duration::seconds(5)), Duration::ZERO);
        assert_eq!(
            delay_until(now, now + chrono::Duration::seconds(90)),
            Duration::from_secs(90)
        );
    }

    #[tokio::test]
    async fn shutdown_before_first_tick_returns_no_reports() {
        let tmp = TempDir::new().unwrap();
        let config = BatchConfig {
            work_root: tmp.path().join("work"),
            artifact_dir: tmp.path().join("artifacts"),
            ..BatchConfig::default()
        };
        let orch = Arc::new(BatchOrchestrator::new(config).unwrap());
        let producer = Arc::new(CommandProducer::new("true", &[]));
        let cron: CronSchedule = "0 0 1 1 *".parse().unwrap();

        let reports = run_schedule(orch, producer, cron, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await
        .unwrap();
        assert!(reports.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn due_tick_fires_scheduled_run_and_awaits_it_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let orch = Arc::new(BatchOrchestrator::new(test_config(&tmp)).unwrap());
        // Still running when shutdown is requested.
        let producer = Arc::new(CommandProducer::new(
            "sh",
            &["-c", "sleep 1; printf sheet > \"$BATCHRUN_OUTPUT_DIR/data.xlsx\""],
        ));
        let cron: CronSchedule = "0 2 * * *".parse().unwrap();

        // A frozen clock keeps reporting the same instant after the tick.
        let reports = run_schedule_with_clock(
            Arc::clone(&orch),
            producer,
            cron,
            tokio::time::sleep(Duration::from_millis(500)),
            just_before_tick,
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 1, "{reports:?}");
        let report = &reports[0];
        assert_eq!(report.trigger, Trigger::Schedule("0 2 * * *".into()));
        assert_eq!(report.run_number, 1);
        assert_eq!(report.final_state, RunState::Published);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(orch.store().list().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_next_fires_on_the_coming_tick() {
        let tmp = TempDir::new().unwrap();
        let orch = BatchOrchestrator::new(test_config(&tmp)).unwrap();
        let producer = CommandProducer::new("sh", &["-c", "printf x > \"$BATCHRUN_OUTPUT_DIR/data.xlsx\""]);
        let cron: CronSchedule = "0 2 * * *".parse().unwrap();

        let report = run_next_from(&orch, &producer, &cron, just_before_tick())
            .await
            .unwrap();
        assert_eq!(report.trigger, Trigger::Schedule("0 2 * * *".into()));
        assert!(report.is_success(), "{report:?}");
    }

    #[tokio::test]
    async fn run_next_rejects_schedule_that_never_fires() {
        let tmp = TempDir::new().unwrap();
        let config = BatchConfig {
            work_root: tmp.path().join("work"),
            artifact_dir: tmp.path().join("artifacts"),
            ..BatchConfig::default()
        };
        let orch = BatchOrchestrator::new(config).unwrap();
        let cron: CronSchedule = "0 0 30 2 *".parse().unwrap();

        let err = run_next(&orch, &CommandProducer::new("true", &[]), &cron)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ScheduleError");
    }
}
