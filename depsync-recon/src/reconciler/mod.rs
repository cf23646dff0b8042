//! Reconciliation orchestrator
//!
//! `Idle → Preflight → {Individual | Collective} → {Done | Failed}`
//!
//! Both entry points share one `RunGuard`. A trigger that finds a run in
//! progress is dropped with a warning and reported as `RunOutcome::Skipped`;
//! it never reaches the backend.

pub mod collective;
pub mod finalize;
pub mod individual;
pub mod preflight;
pub mod run_guard;

pub use collective::{CategoryPopulation, CollectiveReport};
pub use finalize::FinalizeReport;
pub use individual::IndividualReport;
pub use run_guard::RunGuard;

use crate::db::ResilientStore;
use crate::error::Result;
use crate::services::EvidenceScanner;
use crate::utils::RetryPolicy;
use depsync_common::config::EvidenceRoots;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a trigger
#[derive(Debug, Clone)]
pub enum RunOutcome<R> {
    Completed(R),
    /// Another run was active; nothing was done
    Skipped,
}

impl<R> RunOutcome<R> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }

    pub fn completed(self) -> Option<R> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Skipped => None,
        }
    }
}

/// Entry points of the engine; cheap to clone, clones share the guard
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: ResilientStore,
    scanner: EvidenceScanner,
    guard: Arc<RunGuard>,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, roots: EvidenceRoots, policy: RetryPolicy) -> Self {
        Self {
            store: ResilientStore::new(pool, policy),
            scanner: EvidenceScanner::new(roots),
            guard: Arc::new(RunGuard::new()),
        }
    }

    pub fn store(&self) -> &ResilientStore {
        &self.store
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Full sweep over every category
    pub async fn run_collective(&self) -> Result<RunOutcome<CollectiveReport>> {
        let Some(_token) = self.guard.try_acquire() else {
            tracing::warn!(mode = "collective", "Run already in progress, trigger skipped");
            return Ok(RunOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        tracing::info!(run_id = %run_id, mode = "collective", "Reconciliation started");

        let result = async {
            preflight::check_roots(self.scanner.roots())?;
            collective::run(&self.store, &self.scanner, run_id).await
        }
        .await;

        match result {
            Ok(report) => {
                tracing::info!(
                    run_id = %run_id,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    flags_set = report.finalize.flags_set,
                    "Collective reconciliation complete"
                );
                Ok(RunOutcome::Completed(report))
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Collective reconciliation failed");
                Err(e)
            }
        }
    }

    /// Reset and recompute the flags of one PartCode
    pub async fn run_individual(&self, part_code: &str) -> Result<RunOutcome<IndividualReport>> {
        let Some(_token) = self.guard.try_acquire() else {
            tracing::warn!(mode = "individual", part_code, "Run already in progress, trigger skipped");
            return Ok(RunOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        tracing::info!(run_id = %run_id, mode = "individual", part_code, "Reconciliation started");

        let result = async {
            preflight::check_roots(self.scanner.roots())?;
            individual::run(&self.store, &self.scanner, part_code, run_id).await
        }
        .await;

        match result {
            Ok(report) => Ok(RunOutcome::Completed(report)),
            Err(e) => {
                tracing::error!(run_id = %run_id, part_code, error = %e, "Individual reconciliation failed");
                Err(e)
            }
        }
    }
}
