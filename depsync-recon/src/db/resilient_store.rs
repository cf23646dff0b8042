//! Resilient store
//!
//! Statement, scalar, query and transaction primitives over the SQLite pool.
//! Each primitive runs its round-trip under the retry policy; a transaction
//! body is replayed as a whole after a rollback when a transient fault hits
//! any of its statements or the commit.

use crate::error::{ReconcileError, Result};
use crate::utils::db_retry::{judge, retry_transient, RetryPolicy, Verdict};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::fmt;
use std::time::Instant;

/// Positional statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    /// Stored as RFC 3339 text
    Timestamp(DateTime<Utc>),
    Null,
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Text(s) => write!(f, "'{}'", s),
            SqlParam::Int(i) => write!(f, "{}", i),
            SqlParam::Timestamp(ts) => write!(f, "'{}'", ts.to_rfc3339()),
            SqlParam::Null => f.write_str("NULL"),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(value)
    }
}

/// Render parameters for log records
pub fn render_params(params: &[SqlParam]) -> String {
    let parts: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Bind every parameter in order
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Timestamp(ts) => query.bind(ts.to_rfc3339()),
            SqlParam::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

/// Attach the failing statement and its parameters to a backend fault
///
/// Used by the statements of a transaction body so the retry layer can log
/// and surface the SQL that actually failed rather than the body's label.
pub fn in_statement<'a>(
    sql: &'a str,
    params: &'a [SqlParam],
) -> impl FnOnce(sqlx::Error) -> ReconcileError + 'a {
    move |source| ReconcileError::Statement {
        statement: sql.to_string(),
        params: render_params(params),
        source,
    }
}

/// Transaction body: receives the connection of the open transaction
///
/// The body may run more than once, so it must own (or clone per call)
/// whatever it captures.
pub type TxBody<'c, T> = BoxFuture<'c, Result<T>>;

/// Pool plus retry policy
#[derive(Debug, Clone)]
pub struct ResilientStore {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl ResilientStore {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a statement, returning the number of rows affected
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let rendered = render_params(params);
        let pool = &self.pool;

        retry_transient(&self.policy, sql, &rendered, move || async move {
            let result = bind_all(sqlx::query(sql), params).execute(pool).await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Execute a query returning a single integer in its first column
    pub async fn scalar_i64(&self, sql: &str, params: &[SqlParam]) -> Result<i64> {
        let rendered = render_params(params);
        let pool = &self.pool;

        retry_transient(&self.policy, sql, &rendered, move || async move {
            let row = bind_all(sqlx::query(sql), params).fetch_one(pool).await?;
            let value: i64 = row.try_get(0)?;
            Ok(value)
        })
        .await
    }

    /// Execute a query returning every row
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqliteRow>> {
        let rendered = render_params(params);
        let pool = &self.pool;

        retry_transient(&self.policy, sql, &rendered, move || async move {
            let rows = bind_all(sqlx::query(sql), params).fetch_all(pool).await?;
            Ok(rows)
        })
        .await
    }

    /// Run `body` inside one transaction
    ///
    /// Commits exactly once on success. Any error rolls the transaction back
    /// before it is retried (transient backend fault) or surfaced.
    pub async fn in_transaction<T, F>(&self, label: &str, mut body: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> TxBody<'c, T>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt_transaction(label, &mut body).await {
                Ok(value) => return Ok(value),
                Err(err) => match judge(&self.policy, attempt, label, "", err) {
                    Verdict::Retry => tokio::time::sleep(self.policy.delay).await,
                    Verdict::Fail(err) => return Err(err),
                },
            }
        }
    }

    async fn attempt_transaction<T, F>(&self, label: &str, body: &mut F) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> TxBody<'c, T>,
    {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let outcome = body(&mut *tx).await;

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                tracing::debug!(
                    transaction = label,
                    held_ms = started.elapsed().as_millis() as u64,
                    "Transaction committed"
                );
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        transaction = label,
                        error = %rollback_err,
                        "Rollback failed, connection discarded"
                    );
                } else {
                    tracing::debug!(
                        transaction = label,
                        held_ms = started.elapsed().as_millis() as u64,
                        "Transaction rolled back"
                    );
                }
                Err(err)
            }
        }
    }
}
