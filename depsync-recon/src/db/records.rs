//! Dependency record and counter persistence
//!
//! Connection-level helpers run inside a caller's transaction; the
//! pool-level readers are used by reporting and tests.

use crate::catalog::EvidenceCategory;
use crate::db::resilient_store::{bind_all, in_statement, SqlParam};
use crate::error::Result;
use chrono::{DateTime, Utc};
use depsync_common::db::FLAG_COUNT;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

/// Persisted flags of one PartCode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub part_code: String,
    /// `flags[0]` is dep01
    pub flags: [bool; FLAG_COUNT as usize],
    pub scan_date: Option<DateTime<Utc>>,
}

impl DependencyRecord {
    /// Flag of category `id` (1-based)
    pub fn flag(&self, id: u8) -> bool {
        id >= 1 && id <= FLAG_COUNT && self.flags[(id - 1) as usize]
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let mut flags = [false; FLAG_COUNT as usize];
        for (index, flag) in flags.iter_mut().enumerate() {
            let value: i64 = row.try_get(format!("dep{:02}", index + 1).as_str())?;
            *flag = value != 0;
        }

        let scan_date: Option<String> = row.try_get("scan_date")?;
        let scan_date = scan_date.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| tracing::warn!(scan_date = %raw, error = %e, "Unparsable scan date"))
                .ok()
        });

        Ok(Self {
            part_code: row.try_get("part_code")?,
            flags,
            scan_date,
        })
    }
}

/// Create the record with every flag false if it does not exist
pub async fn ensure_record(conn: &mut SqliteConnection, part_code: &str) -> Result<bool> {
    const SQL: &str =
        "INSERT INTO dependency_records (part_code) VALUES (?) ON CONFLICT(part_code) DO NOTHING";
    let params = [SqlParam::from(part_code)];

    let result = bind_all(sqlx::query(SQL), &params)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(SQL, &params))?;

    Ok(result.rows_affected() > 0)
}

pub async fn reset_flags(conn: &mut SqliteConnection, part_code: &str) -> Result<()> {
    let assignments: Vec<String> = (1..=FLAG_COUNT).map(|id| format!("dep{:02} = 0", id)).collect();
    let sql = format!(
        "UPDATE dependency_records SET {} WHERE part_code = ?",
        assignments.join(", ")
    );
    let params = [SqlParam::from(part_code)];

    bind_all(sqlx::query(&sql), &params)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(&sql, &params))?;
    Ok(())
}

pub async fn set_flag(
    conn: &mut SqliteConnection,
    category: &EvidenceCategory,
    part_code: &str,
) -> Result<()> {
    let sql = format!(
        "UPDATE dependency_records SET {} = 1 WHERE part_code = ?",
        category.flag_column()
    );
    let params = [SqlParam::from(part_code)];

    bind_all(sqlx::query(&sql), &params)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(&sql, &params))?;
    Ok(())
}

pub async fn set_scan_date(
    conn: &mut SqliteConnection,
    part_code: &str,
    scan_date: DateTime<Utc>,
) -> Result<()> {
    const SQL: &str = "UPDATE dependency_records SET scan_date = ? WHERE part_code = ?";
    let params = [SqlParam::from(scan_date), SqlParam::from(part_code)];

    bind_all(sqlx::query(SQL), &params)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(SQL, &params))?;
    Ok(())
}

/// Whether the PartCode is listed as a child of another part
pub async fn is_child_reference(conn: &mut SqliteConnection, part_code: &str) -> Result<bool> {
    let count = count_rows(conn, "SELECT COUNT(*) FROM child_references WHERE child = ?", part_code).await?;
    Ok(count > 0)
}

/// Run a category's `COUNT(*)` query for one PartCode
pub async fn count_rows(conn: &mut SqliteConnection, count_sql: &str, part_code: &str) -> Result<i64> {
    let params = [SqlParam::from(part_code)];

    let row = bind_all(sqlx::query(count_sql), &params)
        .fetch_one(&mut *conn)
        .await
        .map_err(in_statement(count_sql, &params))?;
    let count: i64 = row.try_get(0).map_err(in_statement(count_sql, &params))?;
    Ok(count)
}

/// Insert or overwrite one counter
pub async fn upsert_counter(conn: &mut SqliteConnection, code: &str, value: i64) -> Result<()> {
    const SQL: &str = "INSERT INTO counters (code, value) VALUES (?, ?) \
                       ON CONFLICT(code) DO UPDATE SET value = excluded.value";
    let params = [SqlParam::from(code), SqlParam::from(value)];

    bind_all(sqlx::query(SQL), &params)
        .execute(&mut *conn)
        .await
        .map_err(in_statement(SQL, &params))?;
    Ok(())
}

/// Load one record
pub async fn load_record(pool: &SqlitePool, part_code: &str) -> Result<Option<DependencyRecord>> {
    let row = sqlx::query("SELECT * FROM dependency_records WHERE part_code = ?")
        .bind(part_code)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(DependencyRecord::from_row(&row)?)),
        None => Ok(None),
    }
}

/// Load one counter value
pub async fn load_counter(pool: &SqlitePool, code: &str) -> Result<Option<i64>> {
    let value = sqlx::query_scalar("SELECT value FROM counters WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}
