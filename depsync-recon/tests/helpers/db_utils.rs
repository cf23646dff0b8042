//! Database test utilities

use anyhow::Result;
use depsync_common::db::init_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_url = format!("sqlite://{}", temp_dir.path().join("test_deps.db").display());
    let pool = init_database(&db_url).await?;
    Ok((temp_dir, pool))
}

/// Insert a record with the given flags (1-based category ids) set
pub async fn seed_record(pool: &SqlitePool, part_code: &str, flags: &[u8]) -> Result<()> {
    sqlx::query("INSERT INTO dependency_records (part_code) VALUES (?)")
        .bind(part_code)
        .execute(pool)
        .await?;

    for id in flags {
        let sql = format!("UPDATE dependency_records SET dep{:02} = 1 WHERE part_code = ?", id);
        sqlx::query(&sql).bind(part_code).execute(pool).await?;
    }
    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn row_count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Every counter as (code, value), ordered by code
pub async fn all_counters(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT code, value FROM counters ORDER BY code")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Staged PartCodes of one staging table, sorted
pub async fn staged_codes(pool: &SqlitePool, staging_table: &str) -> Result<Vec<String>> {
    let sql = format!("SELECT part_code FROM {} ORDER BY part_code", staging_table);
    let codes: Vec<String> = sqlx::query_scalar(&sql).fetch_all(pool).await?;
    Ok(codes)
}
