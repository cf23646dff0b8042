//! Database retry logic
//!
//! Bounded retry of backend round-trips on transient faults. A fault is
//! transient only if it belongs to a closed set: the SQLite busy/locked
//! family (primary and extended codes) and pool acquisition timeouts.
//! Everything else fails on the first attempt.

use crate::error::{ReconcileError, Result};
use depsync_common::config::Settings;
use std::future::Future;
use std::time::Duration;

/// SQLite result codes treated as transient
///
/// BUSY, LOCKED, BUSY_RECOVERY, LOCKED_SHAREDCACHE, BUSY_SNAPSHOT, BUSY_TIMEOUT
pub const TRANSIENT_SQLITE_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

/// Attempt ceiling and fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included (never below 1)
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.retry_attempts, settings.retry_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

/// Whether a backend fault is likely to succeed on retry
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| TRANSIENT_SQLITE_CODES.contains(&code.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

/// What to do with a failed attempt
#[derive(Debug)]
pub enum Verdict {
    /// Sleep the policy delay and try again
    Retry,
    /// Stop and surface this error
    Fail(ReconcileError),
}

/// Classify a failed attempt, logging the diagnostic context either way
///
/// Raw backend faults are wrapped into `DataFault` when they are surfaced.
/// A `Statement` fault carries its own SQL and parameters, which take the
/// place of the caller's `statement` and `params`. Non-backend errors pass
/// through unchanged.
pub fn judge(
    policy: &RetryPolicy,
    attempt: u32,
    statement: &str,
    params: &str,
    err: ReconcileError,
) -> Verdict {
    match err {
        ReconcileError::Database(source) => classify(policy, attempt, statement, params, source),
        ReconcileError::Statement {
            statement: failing,
            params: bound,
            source,
        } => {
            tracing::debug!(context = statement, statement = %failing, "Statement failed inside unit of work");
            classify(policy, attempt, &failing, &bound, source)
        }
        other => {
            tracing::error!(
                statement,
                params,
                attempt,
                error = %other,
                "Operation failed"
            );
            Verdict::Fail(other)
        }
    }
}

fn classify(
    policy: &RetryPolicy,
    attempt: u32,
    statement: &str,
    params: &str,
    db_err: sqlx::Error,
) -> Verdict {
    if is_transient(&db_err) && attempt < policy.max_attempts {
        tracing::warn!(
            statement,
            params,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = policy.delay.as_millis() as u64,
            error = %db_err,
            "Transient database fault, will retry after delay"
        );
        return Verdict::Retry;
    }

    tracing::error!(
        statement,
        params,
        attempt,
        transient = is_transient(&db_err),
        error = %db_err,
        "Database operation failed"
    );
    Verdict::Fail(ReconcileError::DataFault {
        statement: statement.to_string(),
        params: params.to_string(),
        attempts: attempt,
        source: db_err,
    })
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// attempt ceiling
///
/// `statement` and `params` only feed the log records and the surfaced
/// `DataFault`.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    statement: &str,
    params: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(statement, attempt, "Database operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match judge(policy, attempt, statement, params, err) {
                Verdict::Retry => tokio::time::sleep(policy.delay).await,
                Verdict::Fail(err) => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_policy_never_below_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_transient(&quick(3), "SELECT 1", "", || async {
            Ok::<i32, ReconcileError>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_faults() {
        let mut attempts = 0;

        let result = retry_transient(&quick(3), "UPDATE counters", "", || {
            attempts += 1;
            let current = attempts;
            async move {
                if current < 3 {
                    Err(ReconcileError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_ceiling() {
        let mut attempts = 0;

        let result: Result<()> = retry_transient(&quick(3), "UPDATE counters", "[060]", || {
            attempts += 1;
            async { Err(ReconcileError::Database(sqlx::Error::PoolTimedOut)) }
        })
        .await;

        assert_eq!(attempts, 3);
        match result {
            Err(ReconcileError::DataFault {
                statement,
                attempts,
                ..
            }) => {
                assert_eq!(statement, "UPDATE counters");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected DataFault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let mut attempts = 0;

        let result: Result<()> = retry_transient(&quick(5), "SELECT", "", || {
            attempts += 1;
            async { Err(ReconcileError::Database(sqlx::Error::RowNotFound)) }
        })
        .await;

        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(ReconcileError::DataFault { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_statement_fault_reports_its_own_sql() {
        let result: Result<()> = retry_transient(&quick(3), "stage category 17", "", || async {
            Err(ReconcileError::Statement {
                statement: "SELECT COUNT(*) FROM plan_list WHERE article_code = ?".to_string(),
                params: "['ABCD1234']".to_string(),
                source: sqlx::Error::RowNotFound,
            })
        })
        .await;

        match result {
            Err(ReconcileError::DataFault { statement, params, attempts, .. }) => {
                assert!(statement.contains("plan_list"));
                assert_eq!(params, "['ABCD1234']");
                assert_eq!(attempts, 1);
            }
            other => panic!("expected DataFault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_database_error_passes_through() {
        let result: Result<()> = retry_transient(&quick(3), "probe", "", || async {
            Err(ReconcileError::InvalidPartCode(String::new()))
        })
        .await;

        assert!(matches!(result, Err(ReconcileError::InvalidPartCode(_))));
    }
}
