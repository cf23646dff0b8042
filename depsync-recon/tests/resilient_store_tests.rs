//! Resilient store tests
//!
//! - Transient faults are retried up to the ceiling with one warning each
//! - A write blocked by another connection's lock (SQLITE_BUSY) is transient
//! - Permanent faults surface at once with statement context
//! - A transaction body that fails is rolled back before it is replayed

mod helpers;

use depsync_common::db::create_schema;
use depsync_recon::db::{ResilientStore, SqlParam};
use depsync_recon::utils::db_retry::TRANSIENT_SQLITE_CODES;
use depsync_recon::utils::{is_transient, RetryPolicy};
use depsync_recon::ReconcileError;
use helpers::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqlitePool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::Level;

const UPSERT_COUNTER: &str =
    "INSERT INTO counters (code, value) VALUES (?, ?) ON CONFLICT(code) DO UPDATE SET value = excluded.value";

/// Single-connection pool whose acquire times out quickly
async fn narrow_pool(dir: &TempDir) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("narrow.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(200))
        .connect_with(options)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

/// Pool that fails with SQLITE_BUSY at once instead of waiting on a lock,
/// plus a second connection holding the write lock
async fn locked_database(dir: &TempDir) -> (SqlitePool, SqliteConnection) {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("locked.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::ZERO);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options.clone())
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();

    let mut holder = SqliteConnection::connect_with(&options).await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut holder).await.unwrap();
    (pool, holder)
}

#[tokio::test]
async fn test_busy_database_fault_is_transient() {
    let dir = TempDir::new().unwrap();
    let (pool, mut holder) = locked_database(&dir).await;

    let err = sqlx::query(UPSERT_COUNTER)
        .bind("010")
        .bind(1_i64)
        .execute(&pool)
        .await
        .unwrap_err();

    let code = match &err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    };
    assert!(
        code.as_deref().map_or(false, |c| TRANSIENT_SQLITE_CODES.contains(&c)),
        "unexpected fault {:?} with code {:?}",
        err,
        code
    );
    assert!(is_transient(&err));

    sqlx::query("COMMIT").execute(&mut holder).await.unwrap();
}

#[tokio::test]
async fn test_write_retried_until_lock_released() {
    let dir = TempDir::new().unwrap();
    let (pool, mut holder) = locked_database(&dir).await;
    let (logs, _guard) = capture_logs();

    // Attempts at ~0ms and ~200ms hit the lock; the third, at ~400ms, does not
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        sqlx::query("COMMIT").execute(&mut holder).await.unwrap();
        holder
    });

    let store = ResilientStore::new(pool.clone(), RetryPolicy::new(3, Duration::from_millis(200)));
    let affected = store
        .execute(UPSERT_COUNTER, &[SqlParam::from("010"), SqlParam::from(4_i64)])
        .await
        .unwrap();
    let _holder = release.await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(all_counters(&pool).await.unwrap(), vec![("010".to_string(), 4)]);

    let warnings = logs.events_at(Level::WARN, "Transient database fault");
    assert!(!warnings.is_empty());
    assert!(warnings
        .iter()
        .all(|w| w.field("error").map_or(false, |e| e.contains("locked"))));
    assert_eq!(logs.count_at(Level::ERROR, "Database operation failed"), 0);
}

#[tokio::test]
async fn test_counter_write_survives_two_transient_faults() {
    let dir = TempDir::new().unwrap();
    let pool = narrow_pool(&dir).await;
    let (logs, _guard) = capture_logs();

    // Attempts start at ~0ms and ~800ms and time out after 200ms each;
    // the third starts at ~1600ms, after the connection is back
    let held = pool.acquire().await.unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1300)).await;
        drop(held);
    });

    let store = ResilientStore::new(pool.clone(), RetryPolicy::new(3, Duration::from_millis(600)));
    let params = [SqlParam::from("060"), SqlParam::from(5_i64)];
    let affected = store.execute(UPSERT_COUNTER, &params).await.unwrap();
    release.await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        all_counters(&pool).await.unwrap(),
        vec![("060".to_string(), 5)]
    );
    assert_eq!(logs.count_at(Level::WARN, "Transient database fault"), 2);
    assert_eq!(logs.count_at(Level::ERROR, "Database operation failed"), 0);
}

#[tokio::test]
async fn test_transient_fault_exhausts_ceiling() {
    let dir = TempDir::new().unwrap();
    let pool = narrow_pool(&dir).await;
    let (logs, _guard) = capture_logs();
    let _held = pool.acquire().await.unwrap();

    let store = ResilientStore::new(pool.clone(), RetryPolicy::new(2, Duration::from_millis(10)));
    let result = store.execute(UPSERT_COUNTER, &[SqlParam::from("070"), SqlParam::from(1_i64)]).await;

    match result {
        Err(ReconcileError::DataFault { attempts, source, .. }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(source, sqlx::Error::PoolTimedOut));
        }
        other => panic!("expected DataFault, got {:?}", other),
    }
    assert_eq!(logs.count_at(Level::WARN, "Transient database fault"), 1);
    assert_eq!(logs.count_at(Level::ERROR, "Database operation failed"), 1);
}

#[tokio::test]
async fn test_permanent_fault_is_not_retried() {
    let (_db_dir, pool) = create_test_db().await.unwrap();
    let (logs, _guard) = capture_logs();

    let store = ResilientStore::new(pool, quick_policy());
    let result = store
        .execute("UPDATE missing_table SET value = ? WHERE code = ?", &[SqlParam::from(1_i64), SqlParam::from("010")])
        .await;

    match result {
        Err(ReconcileError::DataFault { statement, attempts, .. }) => {
            assert_eq!(attempts, 1);
            assert!(statement.contains("missing_table"));
        }
        other => panic!("expected DataFault, got {:?}", other),
    }
    assert_eq!(logs.count_at(Level::WARN, "Transient database fault"), 0);
    logs.assert_contains("Database operation failed");
}

#[tokio::test]
async fn test_scalar_and_query() {
    let (_db_dir, pool) = create_test_db().await.unwrap();
    seed_record(&pool, "ABCD1234", &[2]).await.unwrap();
    seed_record(&pool, "WXYZ5678", &[]).await.unwrap();

    let store = ResilientStore::new(pool, quick_policy());
    let count = store
        .scalar_i64("SELECT COUNT(*) FROM dependency_records WHERE dep02 = ?", &[SqlParam::from(1_i64)])
        .await
        .unwrap();
    assert_eq!(count, 1);

    let rows = store
        .query("SELECT part_code FROM dependency_records ORDER BY part_code", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_transaction_rolled_back_before_replay() {
    let (_db_dir, pool) = create_test_db().await.unwrap();
    let store = ResilientStore::new(pool.clone(), quick_policy());
    let calls = Arc::new(AtomicU32::new(0));

    let body_calls = calls.clone();
    let value = store
        .in_transaction("insert then fail once", move |conn| {
            let calls = body_calls.clone();
            Box::pin(async move {
                sqlx::query("INSERT INTO counters (code, value) VALUES ('090', 9)")
                    .execute(&mut *conn)
                    .await?;
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ReconcileError::Database(sqlx::Error::PoolTimedOut));
                }
                Ok::<_, ReconcileError>(42)
            })
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // A leftover row from the first attempt would have failed the second insert
    assert_eq!(all_counters(&pool).await.unwrap(), vec![("090".to_string(), 9)]);
}

#[tokio::test]
async fn test_transaction_error_leaves_no_trace() {
    let (_db_dir, pool) = create_test_db().await.unwrap();
    let store = ResilientStore::new(pool.clone(), quick_policy());

    let result: Result<(), ReconcileError> = store
        .in_transaction("insert then fail", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO counters (code, value) VALUES ('100', 1)")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("INSERT INTO no_such_table VALUES (1)")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, ReconcileError>(())
            })
        })
        .await;

    assert!(matches!(result, Err(ReconcileError::DataFault { attempts: 1, .. })));
    assert_eq!(row_count(&pool, "counters").await.unwrap(), 0);
}
