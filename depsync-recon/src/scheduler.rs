//! Daily scheduler for daemon mode
//!
//! Sleeps until the next local occurrence of the configured time of day and
//! spawns a collective run. Runs are spawned rather than awaited so a trigger
//! that lands while a run is still active goes through the run guard and is
//! dropped there. Every spawned run is tracked in a `JoinSet` and drained on
//! shutdown.

use crate::reconciler::{Reconciler, RunOutcome};
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;

const FALLBACK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// When the daemon triggers collective runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at this local time
    Daily(NaiveTime),
    /// Fixed interval from daemon start
    Interval(Duration),
}

impl Schedule {
    /// Parse `HH:MM`; anything else falls back to a 24-hour interval
    pub fn parse(raw: &str) -> Self {
        match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
            Ok(time) => Schedule::Daily(time),
            Err(e) => {
                tracing::error!(
                    execution_time = raw,
                    error = %e,
                    "Unparsable execution time, falling back to a 24-hour interval"
                );
                Schedule::Interval(FALLBACK_INTERVAL)
            }
        }
    }

    /// Time to wait before the next trigger
    pub fn next_delay(&self, now: NaiveDateTime) -> Duration {
        match self {
            Schedule::Daily(time) => delay_until_next(*time, now),
            Schedule::Interval(interval) => *interval,
        }
    }
}

/// Delay until the next occurrence of `time` strictly after `now`
pub fn delay_until_next(time: NaiveTime, now: NaiveDateTime) -> Duration {
    let today = now.date().and_time(time);
    let target = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or(FALLBACK_INTERVAL)
}

/// Run the scheduler until `shutdown` resolves
///
/// Every run spawned by the daemon is awaited before returning, so no run is
/// cut short by the process exiting.
pub async fn run_daemon<S>(reconciler: Reconciler, schedule: Schedule, run_now: bool, shutdown: S)
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut runs = JoinSet::new();
    if run_now {
        tracing::info!("Immediate run requested");
        runs.spawn(scheduled_run(reconciler.clone()));
    }

    let mut next_run = plan_next(&schedule);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Scheduler stopping");
                break;
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                log_join(joined);
                continue;
            }
            _ = tokio::time::sleep_until(next_run) => {
                runs.spawn(scheduled_run(reconciler.clone()));
            }
        }

        next_run = plan_next(&schedule);
    }

    if !runs.is_empty() {
        tracing::info!(pending = runs.len(), "Waiting for in-progress runs to finish");
    }
    while let Some(joined) = runs.join_next().await {
        log_join(joined);
    }
}

fn plan_next(schedule: &Schedule) -> tokio::time::Instant {
    let delay = schedule.next_delay(Local::now().naive_local());
    tracing::info!(
        next_run_in_secs = delay.as_secs(),
        schedule = ?schedule,
        "Waiting for next scheduled run"
    );
    tokio::time::Instant::now() + delay
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Scheduled run task failed");
    }
}

/// One collective run, outcome logged
async fn scheduled_run(reconciler: Reconciler) {
    match reconciler.run_collective().await {
        Ok(RunOutcome::Completed(report)) => {
            tracing::info!(run_id = %report.run_id, "Scheduled run finished");
        }
        // Logged by the guard
        Ok(RunOutcome::Skipped) => {}
        Err(e) => {
            tracing::error!(error = %e, "Scheduled run failed");
        }
    }
}
