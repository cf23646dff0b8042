//! depsync-recon - dependency reconciliation service
//!
//! Command surface:
//! - `run-all`: one collective run
//! - `run-one <PART_CODE>`: one individual run
//! - `run-scheduled`: one collective run, as fired by an external scheduler
//! - `daemon [--run-now]` (default): daily scheduler until Ctrl+C / SIGTERM

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depsync_common::config::{load_settings, Overrides, Settings};
use depsync_common::db::init_database;
use depsync_recon::reconciler::{CollectiveReport, IndividualReport};
use depsync_recon::scheduler::{run_daemon, Schedule};
use depsync_recon::utils::RetryPolicy;
use depsync_recon::{Reconciler, RunOutcome};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "depsync-recon")]
#[command(about = "Reconcile part dependency flags against document and database evidence")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend connection descriptor (sqlite: URL)
    #[arg(long)]
    database: Option<String>,

    /// Directory holding every evidence root
    #[arg(long)]
    evidence_base: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Run one collective reconciliation
    RunAll,
    /// Reset and recompute the flags of one part
    RunOne {
        /// PartCode to reconcile
        part_code: String,
    },
    /// Run one collective reconciliation (scheduler entry point)
    RunScheduled,
    /// Stay resident and run daily at the configured time
    Daemon {
        /// Trigger one run immediately at start
        #[arg(long)]
        run_now: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Invalid invocation prints usage and performs no run
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return Ok(());
        }
    };

    // RUST_LOG wins; otherwise the configured level is applied once known
    let rust_log_set = std::env::var("RUST_LOG").is_ok();
    let initial_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(build_filter(&initial_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting depsync-recon v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let overrides = Overrides {
        config_path: args.config.clone(),
        database_url: args.database.clone(),
        evidence_base: args.evidence_base.clone(),
        log_level: args.log_level.clone(),
    };
    let settings = load_settings(&overrides).context("Configuration fault")?;

    if !rust_log_set && settings.log_level != initial_level {
        if let Err(e) = filter_handle.reload(build_filter(&settings.log_level)) {
            warn!("Could not apply configured log level: {}", e);
        }
    }

    log_settings(&settings);

    let pool = init_database(&settings.database_url)
        .await
        .context("Failed to open database")?;
    let reconciler = Reconciler::new(
        pool,
        settings.roots.clone(),
        RetryPolicy::from_settings(&settings),
    );

    match args.command.unwrap_or(Command::Daemon { run_now: false }) {
        Command::RunAll | Command::RunScheduled => {
            let outcome = reconciler.run_collective().await?;
            report_collective(outcome);
        }
        Command::RunOne { part_code } => {
            let outcome = reconciler.run_individual(&part_code).await?;
            report_individual(outcome);
        }
        Command::Daemon { run_now } => {
            let schedule = Schedule::parse(&settings.execution_time);
            info!("Daemon started, execution time {}", settings.execution_time);
            run_daemon(reconciler, schedule, run_now, shutdown_signal()).await;
            info!("Daemon shutdown complete");
        }
    }

    Ok(())
}

/// `RUST_LOG` when set, else the given level
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn log_settings(settings: &Settings) {
    info!("Database: {}", settings.database_url);
    for (id, path) in settings.roots.iter() {
        info!("Evidence root {}: {}", id, path.display());
    }
    info!(
        "Retry policy: {} attempt(s), {}s delay",
        settings.retry_attempts,
        settings.retry_delay.as_secs()
    );
}

fn report_collective(outcome: RunOutcome<CollectiveReport>) {
    match outcome {
        RunOutcome::Completed(report) => {
            for population in &report.populations {
                info!(
                    "Category {:02} (counter {}): {}",
                    population.category, population.counter_code, population.count
                );
            }
            info!(
                "Collective run {} done in {:.1}s: {} flag(s) set, {} scan date(s) refreshed",
                report.run_id,
                report.elapsed.as_secs_f64(),
                report.finalize.flags_set,
                report.finalize.scan_dates_refreshed
            );
        }
        RunOutcome::Skipped => warn!("Collective run skipped: another run is in progress"),
    }
}

fn report_individual(outcome: RunOutcome<IndividualReport>) {
    match outcome {
        RunOutcome::Completed(report) => {
            let set: Vec<String> = report
                .flags
                .iter()
                .enumerate()
                .filter(|(_, flag)| **flag)
                .map(|(index, _)| format!("dep{:02}", index + 1))
                .collect();
            info!(
                "Part {}{}: flags set [{}], scan date {}",
                report.part_code,
                if report.created { " (new record)" } else { "" },
                set.join(", "),
                report
                    .scan_date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "unchanged".to_string())
            );
        }
        RunOutcome::Skipped => warn!("Individual run skipped: another run is in progress"),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
