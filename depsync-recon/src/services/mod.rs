//! Evidence discovery and staging services

pub mod evidence_scanner;
pub mod staging_loader;

pub use evidence_scanner::EvidenceScanner;
pub use staging_loader::{load_staging, prepare_staging_area};
