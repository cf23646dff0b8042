//! Temporary evidence roots for tests
//!
//! Creates all eleven roots under one TempDir, laid out as
//! `<base>/<root key>` like the default configuration.

use depsync_common::config::{EvidenceRoots, RootId};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub struct EvidenceTree {
    dir: TempDir,
}

impl EvidenceTree {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for id in RootId::ALL {
            fs::create_dir_all(dir.path().join(id.key())).unwrap();
        }
        Self { dir }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn roots(&self) -> EvidenceRoots {
        EvidenceRoots::under(self.dir.path())
    }

    pub fn path(&self, root: RootId, relative: &str) -> PathBuf {
        self.dir.path().join(root.key()).join(relative)
    }

    /// Create an evidence file (and its parent directories)
    pub fn touch(&self, root: RootId, relative: &str) -> PathBuf {
        let path = self.path(root, relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"evidence").unwrap();
        path
    }

    pub fn mkdir(&self, root: RootId, relative: &str) -> PathBuf {
        let path = self.path(root, relative);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn remove(&self, root: RootId, relative: &str) {
        fs::remove_file(self.path(root, relative)).unwrap();
    }

    /// Make a root unreachable
    pub fn remove_root(&self, root: RootId) {
        fs::remove_dir_all(self.dir.path().join(root.key())).unwrap();
    }
}

/// Fast retry policy for tests
pub fn quick_policy() -> depsync_recon::utils::RetryPolicy {
    depsync_recon::utils::RetryPolicy::new(3, Duration::from_millis(5))
}
