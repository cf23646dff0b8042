//! Utility modules for depsync-recon

pub mod db_retry;

pub use db_retry::{is_transient, retry_transient, RetryPolicy};
