//! Evidence scanner
//!
//! Walks the evidence roots with `walkdir`, one directory level at a time,
//! following each category's layout. Two uses:
//! - collective scan: every PartCode derivable under a category root
//! - individual probe: whether one PartCode has evidence, and where
//!
//! Directory names are matched against the layout patterns; names that do
//! not match are skipped silently. A keyed level is entered through the
//! matching slice of the probed PartCode instead of being enumerated.

use crate::catalog::{file_stem, DirLevel, EvidenceCategory, EvidenceSource, Extraction, FileProbe};
use crate::error::Result;
use chrono::{DateTime, Utc};
use depsync_common::config::{EvidenceRoots, RootId};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

/// Scanner over the configured evidence roots
#[derive(Debug, Clone)]
pub struct EvidenceScanner {
    roots: EvidenceRoots,
}

impl EvidenceScanner {
    pub fn new(roots: EvidenceRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &EvidenceRoots {
        &self.roots
    }

    pub fn root_path(&self, id: RootId) -> &Path {
        self.roots.get(id)
    }

    /// Every PartCode found for a file- or directory-based category
    ///
    /// An unreadable root or bucket is logged and contributes nothing.
    /// Row-based categories have no files and yield an empty set.
    pub fn scan_category(&self, category: &EvidenceCategory) -> BTreeSet<String> {
        let mut codes = BTreeSet::new();

        match category.source {
            EvidenceSource::Files {
                root,
                levels,
                extension,
                extraction,
                ..
            } => {
                let root_path = self.roots.get(root);
                for dir in descend_all(root_path, levels, category) {
                    let files = match list_children(&dir, EntryKind::File) {
                        Ok(files) => files,
                        Err(e) => {
                            tracing::warn!(
                                category = category.id,
                                path = %dir.display(),
                                error = %e,
                                "Unreadable evidence directory, skipped"
                            );
                            continue;
                        }
                    };

                    for (name, _) in files {
                        if !has_extension(&name, extension) {
                            continue;
                        }
                        if let Some(code) = extraction.derive(&name) {
                            codes.insert(code);
                        }
                    }
                }
            }
            EvidenceSource::Directories { root, min_len } => {
                let root_path = self.roots.get(root);
                let extraction = Extraction::DirectoryName { min_len };
                match list_children(root_path, EntryKind::Dir) {
                    Ok(dirs) => {
                        codes.extend(dirs.iter().filter_map(|(name, _)| extraction.derive(name)));
                    }
                    Err(e) => {
                        tracing::warn!(
                            category = category.id,
                            root = %root_path.display(),
                            error = %e,
                            "Unreadable evidence root, category yields no candidates"
                        );
                    }
                }
            }
            EvidenceSource::Rows { .. } => {}
        }

        tracing::debug!(
            category = category.id,
            candidates = codes.len(),
            "Category scan complete"
        );
        codes
    }

    /// Path of the evidence file (or marking directory) for `part_code`
    ///
    /// `Ok(None)` when nothing matches, including PartCodes too short for a
    /// keyed level. Listing errors on existing directories propagate.
    pub fn locate(&self, category: &EvidenceCategory, part_code: &str) -> Result<Option<PathBuf>> {
        match category.source {
            EvidenceSource::Files {
                root,
                levels,
                extension,
                extraction,
                probe,
            } => {
                let root_path = self.roots.get(root);
                for dir in descend_for_code(root_path, levels, part_code)? {
                    for (name, path) in list_children(&dir, EntryKind::File)? {
                        if !has_extension(&name, extension) {
                            continue;
                        }
                        let matched = match probe {
                            FileProbe::Derived => {
                                extraction.derive(&name).as_deref() == Some(part_code)
                            }
                            FileProbe::Prefix => file_stem(&name)
                                .map(|stem| stem.starts_with(part_code))
                                .unwrap_or(false),
                        };
                        if matched {
                            return Ok(Some(path));
                        }
                    }
                }
                Ok(None)
            }
            EvidenceSource::Directories { root, .. } => {
                if !is_plain_name(part_code) {
                    return Ok(None);
                }
                let path = self.roots.get(root).join(part_code);
                Ok(path.is_dir().then_some(path))
            }
            EvidenceSource::Rows { .. } => Ok(None),
        }
    }

    /// Whether `part_code` has evidence in a file- or directory-based category
    pub fn probe(&self, category: &EvidenceCategory, part_code: &str) -> Result<bool> {
        Ok(self.locate(category, part_code)?.is_some())
    }

    /// Last-modified time of the file located for `category`, if any
    pub fn modified_at(
        &self,
        category: &EvidenceCategory,
        part_code: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        match self.locate(category, part_code)? {
            Some(path) => {
                let modified = std::fs::metadata(&path)?.modified()?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            None => Ok(None),
        }
    }
}

/// Every directory reached by enumerating each layout level
fn descend_all(root: &Path, levels: &[DirLevel], category: &EvidenceCategory) -> Vec<PathBuf> {
    let mut dirs = vec![root.to_path_buf()];

    for level in levels {
        let mut next = Vec::new();
        for dir in &dirs {
            match list_children(dir, EntryKind::Dir) {
                Ok(children) => next.extend(
                    children
                        .into_iter()
                        .filter(|(name, _)| level.pattern.matches(name))
                        .map(|(_, path)| path),
                ),
                Err(e) => {
                    tracing::warn!(
                        category = category.id,
                        path = %dir.display(),
                        error = %e,
                        "Unreadable evidence directory, skipped"
                    );
                }
            }
        }
        dirs = next;
    }

    dirs
}

/// Directories reached for one PartCode: keyed levels are joined directly,
/// unkeyed levels are enumerated
fn descend_for_code(root: &Path, levels: &[DirLevel], part_code: &str) -> Result<Vec<PathBuf>> {
    let mut dirs = vec![root.to_path_buf()];

    for level in levels {
        let mut next = Vec::new();
        match level.code_slice {
            Some((start, end)) => {
                let Some(key) = char_slice(part_code, start, end) else {
                    return Ok(Vec::new());
                };
                if !level.pattern.matches(&key) {
                    return Ok(Vec::new());
                }
                for dir in &dirs {
                    let candidate = dir.join(&key);
                    if candidate.is_dir() {
                        next.push(candidate);
                    }
                }
            }
            None => {
                for dir in &dirs {
                    if !dir.is_dir() {
                        continue;
                    }
                    next.extend(
                        list_children(dir, EntryKind::Dir)?
                            .into_iter()
                            .filter(|(name, _)| level.pattern.matches(name))
                            .map(|(_, path)| path),
                    );
                }
            }
        }
        dirs = next;
    }

    Ok(dirs.into_iter().filter(|d| d.is_dir()).collect())
}

/// Immediate children of `dir` of one kind, sorted by name
fn list_children(dir: &Path, kind: EntryKind) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut children = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        let wanted = match kind {
            EntryKind::Dir => entry.file_type().is_dir(),
            EntryKind::File => entry.file_type().is_file(),
        };
        if !wanted {
            continue;
        }
        // Non-UTF-8 names cannot carry a PartCode
        if let Some(name) = entry.file_name().to_str() {
            children.push((name.to_string(), entry.path().to_path_buf()));
        }
    }

    Ok(children)
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn char_slice(s: &str, start: usize, end: usize) -> Option<String> {
    if s.chars().count() < end {
        return None;
    }
    Some(s.chars().skip(start).take(end - start).collect())
}

/// A single path component with no separators or dot segments
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}
