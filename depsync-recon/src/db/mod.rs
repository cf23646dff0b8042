//! Database access for depsync-recon

pub mod records;
pub mod resilient_store;

pub use records::DependencyRecord;
pub use resilient_store::{ResilientStore, SqlParam};
