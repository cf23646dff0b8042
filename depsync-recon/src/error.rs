//! Error types for depsync-recon
//!
//! Fault taxonomy of the reconciliation engine:
//! - raw backend faults (`Database`, or `Statement` when raised inside a
//!   transaction body) are classified as transient or not by the retry
//!   layer; a transient fault that outlives the attempt ceiling and any
//!   non-transient fault surface as `DataFault` with statement context
//! - `StorageAccess` is the preflight failure, raised before any write
//! - a trigger arriving during a run is not an error, see `RunOutcome::Skipped`

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the reconciliation engine
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Backend fault not yet classified by the retry layer
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend fault of one statement, not yet classified
    #[error("Database error in `{statement}` {params}: {source}")]
    Statement {
        statement: String,
        params: String,
        #[source]
        source: sqlx::Error,
    },

    /// Backend fault surfaced after classification and retries
    #[error("Data fault after {attempts} attempt(s) in `{statement}` {params}: {source}")]
    DataFault {
        statement: String,
        params: String,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// One or more evidence roots failed the preflight probe
    #[error("Evidence roots unreachable: {}", format_roots(.roots))]
    StorageAccess { roots: Vec<PathBuf> },

    /// Filesystem error while probing evidence
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PartCode rejected before any work started
    #[error("Invalid part code: '{0}'")]
    InvalidPartCode(String),

    /// depsync-common error (configuration, bootstrap)
    #[error(transparent)]
    Common(#[from] depsync_common::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

fn format_roots(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
