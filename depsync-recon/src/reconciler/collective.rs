//! Collective reconciliation
//!
//! Prepares the staging area, then for each category in catalog order
//! gathers its candidate set (filesystem scan or source-table query) and
//! stages it together with its counter in one transaction. Any category
//! failure aborts the run before Finalize.

use crate::catalog::{EvidenceCategory, EvidenceSource, CATALOG};
use crate::db::records;
use crate::db::ResilientStore;
use crate::error::{ReconcileError, Result};
use crate::reconciler::finalize::{self, FinalizeReport};
use crate::services::{load_staging, prepare_staging_area, EvidenceScanner};
use sqlx::Row;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Deduplicated population of one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPopulation {
    pub category: u8,
    pub counter_code: &'static str,
    pub count: usize,
}

/// Outcome of one collective run
#[derive(Debug, Clone)]
pub struct CollectiveReport {
    pub run_id: Uuid,
    pub populations: Vec<CategoryPopulation>,
    pub finalize: FinalizeReport,
    pub elapsed: Duration,
}

impl CollectiveReport {
    pub fn population(&self, category: u8) -> Option<usize> {
        self.populations
            .iter()
            .find(|p| p.category == category)
            .map(|p| p.count)
    }
}

pub async fn run(
    store: &ResilientStore,
    scanner: &EvidenceScanner,
    run_id: Uuid,
) -> Result<CollectiveReport> {
    let started = Instant::now();

    store
        .in_transaction("prepare staging area", |conn| {
            Box::pin(async move { prepare_staging_area(conn).await })
        })
        .await?;

    let mut populations = Vec::with_capacity(CATALOG.len());

    for category in CATALOG.iter() {
        let candidates = gather(store, scanner, category).await?;
        let count = stage(store, category, candidates).await?;

        tracing::info!(
            run_id = %run_id,
            category = category.id,
            counter = category.counter_code,
            population = count,
            "{} population staged",
            category.description
        );

        populations.push(CategoryPopulation {
            category: category.id,
            counter_code: category.counter_code,
            count,
        });
    }

    let finalize = finalize::run(store, scanner, run_id).await?;

    Ok(CollectiveReport {
        run_id,
        populations,
        finalize,
        elapsed: started.elapsed(),
    })
}

/// Candidate PartCodes of one category, duplicates allowed
async fn gather(
    store: &ResilientStore,
    scanner: &EvidenceScanner,
    category: &'static EvidenceCategory,
) -> Result<Vec<String>> {
    match category.source {
        EvidenceSource::Rows { collect_sql, .. } => {
            let rows = store.query(collect_sql, &[]).await?;
            let mut codes = Vec::with_capacity(rows.len());
            for row in &rows {
                let code: Option<String> = row.try_get(0)?;
                if let Some(code) = code {
                    codes.push(code);
                }
            }
            Ok(codes)
        }
        EvidenceSource::Files { .. } | EvidenceSource::Directories { .. } => {
            let scanner = scanner.clone();
            let codes = tokio::task::spawn_blocking(move || scanner.scan_category(category))
                .await
                .map_err(|e| {
                    ReconcileError::Common(depsync_common::Error::Internal(format!(
                        "Scan task for category {} failed: {}",
                        category.id, e
                    )))
                })?;
            Ok(codes.into_iter().collect())
        }
    }
}

/// Load the staging set and its counter in one transaction
async fn stage(
    store: &ResilientStore,
    category: &'static EvidenceCategory,
    candidates: Vec<String>,
) -> Result<usize> {
    let label = format!("stage category {:02}", category.id);

    store
        .in_transaction(&label, move |conn| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let count = load_staging(&mut *conn, category, &candidates).await?;
                records::upsert_counter(&mut *conn, category.counter_code, count as i64).await?;
                Ok::<_, ReconcileError>(count)
            })
        })
        .await
}
