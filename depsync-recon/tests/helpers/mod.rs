//! Test helper utilities
//!
//! Shared utilities for testing depsync-recon

#![allow(dead_code, unused_imports)]

pub mod db_utils;
pub mod evidence_tree;
pub mod log_capture;

pub use db_utils::{
    all_counters, create_test_db, row_count, seed_record, staged_codes, table_exists,
};
pub use evidence_tree::{quick_policy, EvidenceTree};
pub use log_capture::{capture_logs, LogCapture};
