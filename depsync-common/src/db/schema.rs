//! Table definitions
//!
//! Engine-owned tables (`dependency_records`, `counters`) plus the evidence
//! source tables the engine only reads. Source tables are created empty when
//! absent so a fresh database can run; existing tables are never altered.
//! Staging tables are not created here, the staging loader owns them.

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Number of dependency flags carried by each record
pub const FLAG_COUNT: u8 = 17;

/// Create every table if it does not exist (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_dependency_records_table(pool).await?;
    create_counters_table(pool).await?;

    create_improvement_requests_table(pool).await?;
    create_plan_list_table(pool).await?;
    create_declared_plans_table(pool).await?;
    create_mother_sheet_changes_table(pool).await?;
    create_nonconformity_returns_table(pool).await?;
    create_child_references_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

/// One row per PartCode: 17 flags plus the mother-sheet scan date
pub async fn create_dependency_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependency_records (
            part_code TEXT PRIMARY KEY,
            dep01 INTEGER NOT NULL DEFAULT 0,
            dep02 INTEGER NOT NULL DEFAULT 0,
            dep03 INTEGER NOT NULL DEFAULT 0,
            dep04 INTEGER NOT NULL DEFAULT 0,
            dep05 INTEGER NOT NULL DEFAULT 0,
            dep06 INTEGER NOT NULL DEFAULT 0,
            dep07 INTEGER NOT NULL DEFAULT 0,
            dep08 INTEGER NOT NULL DEFAULT 0,
            dep09 INTEGER NOT NULL DEFAULT 0,
            dep10 INTEGER NOT NULL DEFAULT 0,
            dep11 INTEGER NOT NULL DEFAULT 0,
            dep12 INTEGER NOT NULL DEFAULT 0,
            dep13 INTEGER NOT NULL DEFAULT 0,
            dep14 INTEGER NOT NULL DEFAULT 0,
            dep15 INTEGER NOT NULL DEFAULT 0,
            dep16 INTEGER NOT NULL DEFAULT 0,
            dep17 INTEGER NOT NULL DEFAULT 0,
            scan_date TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Last computed cardinality per category, keyed by 3-digit counter code
pub async fn create_counters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            code TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_improvement_requests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS improvement_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            part_code TEXT NOT NULL,
            modified_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_plan_list_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plan_list (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            article_code TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_declared_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS declared_plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            part_code TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// A change is complete when it is realised and every flagged sub-change
/// (sheet metal, code) carries its own completion date
async fn create_mother_sheet_changes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mother_sheet_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            part_code TEXT NOT NULL,
            completed_at TEXT,
            sheet_metal_change INTEGER NOT NULL DEFAULT 0,
            sheet_metal_changed_at TEXT,
            code_change INTEGER NOT NULL DEFAULT 0,
            code_changed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_nonconformity_returns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nonconformity_returns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reference TEXT NOT NULL,
            return_type TEXT NOT NULL,
            lht TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Parent/child part links; a child inherits its mother's sheet evidence
async fn create_child_references_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS child_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent TEXT NOT NULL,
            child TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
