//! Individual reconciliation of one PartCode
//!
//! A full re-derivation inside one transaction: the record is created if
//! absent, its seventeen flags are cleared, each category check runs in
//! catalog order, the child rule forces flag 1, and the mother sheet's
//! modification time is stamped when the file exists. Any failure rolls the
//! whole transaction back.
//!
//! Filesystem probes run on a blocking thread before the transaction opens,
//! so the write lock is only held for database work.

use crate::catalog::{mother_sheet, EvidenceSource, CATALOG};
use crate::db::records;
use crate::db::ResilientStore;
use crate::error::{ReconcileError, Result};
use crate::services::EvidenceScanner;
use chrono::{DateTime, Utc};
use depsync_common::db::FLAG_COUNT;
use sqlx::sqlite::SqliteConnection;
use uuid::Uuid;

/// Outcome of one individual run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndividualReport {
    pub run_id: Uuid,
    pub part_code: String,
    /// The record did not exist before this run
    pub created: bool,
    /// `flags[0]` is dep01
    pub flags: [bool; FLAG_COUNT as usize],
    /// Set when the mother sheet was found and its date stamped
    pub scan_date: Option<DateTime<Utc>>,
}

/// Reject codes that cannot be a PartCode before any work starts
pub fn validate_part_code(part_code: &str) -> Result<String> {
    let trimmed = part_code.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ReconcileError::InvalidPartCode(part_code.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Filesystem evidence of one PartCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileEvidence {
    /// Probe result per category, `None` for row-backed categories
    probes: [Option<bool>; FLAG_COUNT as usize],
    scan_date: Option<DateTime<Utc>>,
}

fn probe_files(scanner: &EvidenceScanner, code: &str) -> Result<FileEvidence> {
    let mut probes = [None; FLAG_COUNT as usize];

    for category in CATALOG.iter() {
        if let EvidenceSource::Files { .. } | EvidenceSource::Directories { .. } = category.source {
            probes[(category.id - 1) as usize] = Some(scanner.probe(category, code)?);
        }
    }

    Ok(FileEvidence {
        probes,
        scan_date: scanner.modified_at(mother_sheet(), code)?,
    })
}

pub async fn run(
    store: &ResilientStore,
    scanner: &EvidenceScanner,
    part_code: &str,
    run_id: Uuid,
) -> Result<IndividualReport> {
    let code = validate_part_code(part_code)?;
    let label = format!("individual reconciliation of {}", code);

    let evidence = {
        let scanner = scanner.clone();
        let code = code.clone();
        tokio::task::spawn_blocking(move || probe_files(&scanner, &code))
            .await
            .map_err(|e| {
                ReconcileError::Common(depsync_common::Error::Internal(format!(
                    "Probe task for {} failed: {}",
                    part_code, e
                )))
            })??
    };

    let body_code = code.clone();
    let (created, flags) = store
        .in_transaction(&label, move |conn| {
            let code = body_code.clone();
            Box::pin(async move { reconcile_in_transaction(conn, &evidence, &code).await })
        })
        .await?;

    tracing::info!(
        run_id = %run_id,
        part_code = %code,
        created,
        flags_set = flags.iter().filter(|f| **f).count(),
        scan_date = ?evidence.scan_date,
        "Individual reconciliation committed"
    );

    Ok(IndividualReport {
        run_id,
        part_code: code,
        created,
        flags,
        scan_date: evidence.scan_date,
    })
}

async fn reconcile_in_transaction(
    conn: &mut SqliteConnection,
    evidence: &FileEvidence,
    code: &str,
) -> Result<(bool, [bool; FLAG_COUNT as usize])> {
    let created = records::ensure_record(&mut *conn, code).await?;
    records::reset_flags(&mut *conn, code).await?;

    let mut flags = [false; FLAG_COUNT as usize];

    for category in CATALOG.iter() {
        let positive = match (category.source, evidence.probes[(category.id - 1) as usize]) {
            (EvidenceSource::Rows { count_sql, .. }, _) => {
                records::count_rows(&mut *conn, count_sql, code).await? > 0
            }
            (_, probed) => probed.unwrap_or(false),
        };

        tracing::debug!(part_code = code, category = category.id, positive, "Category checked");

        if positive {
            records::set_flag(&mut *conn, category, code).await?;
            flags[(category.id - 1) as usize] = true;
        }
    }

    // A child part inherits its mother's sheet
    if records::is_child_reference(&mut *conn, code).await? {
        tracing::debug!(part_code = code, "Child reference found, flag 1 inherited");
        records::set_flag(&mut *conn, mother_sheet(), code).await?;
        flags[0] = true;
    }

    if let Some(scan_date) = evidence.scan_date {
        records::set_scan_date(&mut *conn, code, scan_date).await?;
    }

    Ok((created, flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depsync_common::config::EvidenceRoots;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validate_part_code() {
        assert_eq!(validate_part_code(" ABCD1234 ").unwrap(), "ABCD1234");
        assert_eq!(validate_part_code("ABCD.123").unwrap(), "ABCD.123");
        assert!(matches!(
            validate_part_code("   "),
            Err(ReconcileError::InvalidPartCode(_))
        ));
        assert!(matches!(
            validate_part_code("../etc"),
            Err(ReconcileError::InvalidPartCode(_))
        ));
    }

    #[test]
    fn test_probe_files_covers_only_filesystem_categories() {
        let temp = TempDir::new().unwrap();
        let sheet = temp.path().join("mother_sheets/ABCD/ABCD1234.tif");
        fs::create_dir_all(sheet.parent().unwrap()).unwrap();
        fs::write(&sheet, b"x").unwrap();
        let scanner = EvidenceScanner::new(EvidenceRoots::under(temp.path()));

        let evidence = probe_files(&scanner, "ABCD1234").unwrap();

        assert_eq!(evidence.probes[0], Some(true));
        for category in CATALOG.iter() {
            let probed = evidence.probes[(category.id - 1) as usize];
            match category.source {
                EvidenceSource::Rows { .. } => assert_eq!(probed, None),
                _ if category.id == 1 => {}
                _ => assert_eq!(probed, Some(false)),
            }
        }
        assert!(evidence.scan_date.is_some());
    }
}
