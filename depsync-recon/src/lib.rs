//! # depsync-recon
//!
//! Dependency reconciliation engine: for every tracked PartCode, records
//! which of seventeen evidence categories exist (documents on the evidence
//! roots, rows in source tables) as flags, plus one counter per category.
//!
//! - `Reconciler::run_collective` sweeps every category and folds the
//!   results in with set-only updates
//! - `Reconciler::run_individual` clears and recomputes one PartCode
//!   atomically

pub mod catalog;
pub mod db;
pub mod error;
pub mod reconciler;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use error::{ReconcileError, Result};
pub use reconciler::{Reconciler, RunOutcome};
