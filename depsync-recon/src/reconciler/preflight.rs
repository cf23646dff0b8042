//! Preflight: every evidence root must be a listable directory
//!
//! Runs before any backend activity. All roots are probed so the error names
//! every unreachable one, not just the first.

use crate::error::{ReconcileError, Result};
use depsync_common::config::EvidenceRoots;
use std::path::{Path, PathBuf};

pub fn check_roots(roots: &EvidenceRoots) -> Result<()> {
    let mut unreachable: Vec<PathBuf> = Vec::new();

    for (id, path) in roots.iter() {
        if let Err(reason) = probe_root(path) {
            tracing::error!(root = %id, path = %path.display(), reason = %reason, "Evidence root unreachable");
            unreachable.push(path.to_path_buf());
        }
    }

    if unreachable.is_empty() {
        tracing::debug!("Preflight passed for all evidence roots");
        Ok(())
    } else {
        Err(ReconcileError::StorageAccess { roots: unreachable })
    }
}

fn probe_root(path: &Path) -> std::result::Result<(), String> {
    if !path.exists() {
        return Err("not found".to_string());
    }
    if !path.is_dir() {
        return Err("not a directory".to_string());
    }
    std::fs::read_dir(path).map_err(|e| e.to_string())?;
    Ok(())
}
