//! # depsync common library
//!
//! Shared code for the depsync workspace:
//! - Error type used across crates
//! - Configuration model and resolution (CLI → ENV → TOML → defaults)
//! - Database bootstrap (connection pool and schema)

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;

pub use error::{Error, Result};
