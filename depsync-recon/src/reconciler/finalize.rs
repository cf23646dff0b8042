//! Finalize: fold staging sets into the persistent flags
//!
//! Each category's join is its own retried statement, so a failure part way
//! through leaves earlier categories applied. Updates only ever set flags and
//! only touch existing records. The scan-date refresh afterwards is best
//! effort: failures are logged per PartCode and skipped.

use crate::catalog::{mother_sheet, CATALOG};
use crate::db::{ResilientStore, SqlParam};
use crate::error::Result;
use crate::services::EvidenceScanner;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Flags switched from 0 to 1, child inheritance included
    pub flags_set: u64,
    pub scan_dates_refreshed: usize,
}

pub async fn run(
    store: &ResilientStore,
    scanner: &EvidenceScanner,
    run_id: Uuid,
) -> Result<FinalizeReport> {
    let mut report = FinalizeReport::default();

    for category in CATALOG.iter() {
        let column = category.flag_column();
        let sql = format!(
            "UPDATE dependency_records SET {col} = 1 \
             WHERE {col} = 0 AND part_code IN (SELECT part_code FROM {staging})",
            col = column,
            staging = category.staging_table
        );
        let updated = store.execute(&sql, &[]).await?;
        tracing::debug!(run_id = %run_id, category = category.id, updated, "Flags folded");
        report.flags_set += updated;
    }

    let inherited = store
        .execute(
            "UPDATE dependency_records SET dep01 = 1 \
             WHERE dep01 = 0 AND part_code IN (SELECT child FROM child_references)",
            &[],
        )
        .await?;
    report.flags_set += inherited;

    report.scan_dates_refreshed = refresh_scan_dates(store, scanner, run_id).await;

    tracing::info!(
        run_id = %run_id,
        flags_set = report.flags_set,
        inherited,
        scan_dates_refreshed = report.scan_dates_refreshed,
        "Finalize complete"
    );

    Ok(report)
}

/// Stamp the mother-sheet modification time on every known record
async fn refresh_scan_dates(store: &ResilientStore, scanner: &EvidenceScanner, run_id: Uuid) -> usize {
    let rows = match store.query("SELECT part_code FROM dependency_records", &[]).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "Scan date refresh skipped");
            return 0;
        }
    };

    let mut codes = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.try_get::<String, _>(0) {
            Ok(code) => codes.push(code),
            Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Unreadable part code, skipped"),
        }
    }

    let scanner = scanner.clone();
    let dated = match tokio::task::spawn_blocking(move || mother_sheet_dates(&scanner, codes, run_id)).await {
        Ok(dated) => dated,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "Scan date refresh skipped");
            return 0;
        }
    };

    let mut refreshed = 0;
    for (code, scan_date) in dated {
        let params = [SqlParam::from(scan_date), SqlParam::from(code.as_str())];
        match store
            .execute("UPDATE dependency_records SET scan_date = ? WHERE part_code = ?", &params)
            .await
        {
            Ok(_) => refreshed += 1,
            Err(e) => {
                tracing::warn!(run_id = %run_id, part_code = %code, error = %e, "Scan date not refreshed");
            }
        }
    }

    refreshed
}

/// Mother-sheet dates of the codes whose sheet exists
fn mother_sheet_dates(
    scanner: &EvidenceScanner,
    codes: Vec<String>,
    run_id: Uuid,
) -> Vec<(String, DateTime<Utc>)> {
    codes
        .into_iter()
        .filter_map(|code| match scanner.modified_at(mother_sheet(), &code) {
            Ok(scan_date) => scan_date.map(|date| (code, date)),
            Err(e) => {
                tracing::warn!(run_id = %run_id, part_code = %code, error = %e, "Mother sheet unreadable");
                None
            }
        })
        .collect()
}
