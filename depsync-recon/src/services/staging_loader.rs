//! Staging loader
//!
//! Materializes a category's candidate PartCodes into its staging table.
//! Candidates are deduplicated in memory, then bulk-inserted in chunks with
//! multi-row `INSERT` statements on the caller's connection, so staging,
//! the counter update and later reads share one unit of work.

use crate::catalog::{EvidenceCategory, CATALOG};
use crate::db::resilient_store::in_statement;
use crate::error::{ReconcileError, Result};
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeSet;

/// Rows per bulk `INSERT` (one bound parameter each)
const INSERT_CHUNK: usize = 500;

/// Deduplicate identifiers, dropping empty strings
pub fn dedup(identifiers: &[String]) -> BTreeSet<&str> {
    identifiers
        .iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .collect()
}

/// Create the category's staging table if absent
pub async fn ensure_staging_table(
    conn: &mut SqliteConnection,
    category: &EvidenceCategory,
) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (part_code TEXT NOT NULL)",
        category.staging_table
    );
    sqlx::query(&sql)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(&sql, &[]))?;
    Ok(())
}

/// Create (if absent) and empty every staging table
///
/// Run once at the start of a collective run so a category with no
/// candidates this run cannot join against rows from a previous one.
pub async fn prepare_staging_area(conn: &mut SqliteConnection) -> Result<()> {
    for category in CATALOG.iter() {
        ensure_staging_table(conn, category).await?;
        let sql = format!("DELETE FROM {}", category.staging_table);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map_err(in_statement(&sql, &[]))?;
    }
    Ok(())
}

/// Load a deduplicated candidate set into the category's staging table
///
/// Returns the number of distinct PartCodes stored. Empty input is a no-op:
/// the table is neither created nor emptied.
pub async fn load_staging(
    conn: &mut SqliteConnection,
    category: &EvidenceCategory,
    identifiers: &[String],
) -> Result<usize> {
    let unique = dedup(identifiers);
    if unique.is_empty() {
        tracing::debug!(category = category.id, "No candidates, staging left untouched");
        return Ok(0);
    }

    ensure_staging_table(conn, category).await?;
    let truncate = format!("DELETE FROM {}", category.staging_table);
    sqlx::query(&truncate)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(&truncate, &[]))?;

    let codes: Vec<&str> = unique.into_iter().collect();
    for chunk in codes.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} (part_code) ", category.staging_table));
        builder.push_values(chunk.iter(), |mut row, code| {
            row.push_bind(code.to_string());
        });
        let inserted = builder.build().execute(&mut *conn).await;
        if let Err(source) = inserted {
            return Err(ReconcileError::Statement {
                statement: builder.into_sql(),
                params: format!("[{} part codes from '{}']", chunk.len(), chunk[0]),
                source,
            });
        }
    }

    tracing::debug!(
        category = category.id,
        staging_table = category.staging_table,
        rows = codes.len(),
        "Staging loaded"
    );

    Ok(codes.len())
}
