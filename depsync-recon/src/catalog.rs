//! Evidence category catalog
//!
//! Seventeen fixed descriptors drive both run modes. File-based categories
//! describe the directory layout under their root and how a PartCode is
//! derived from a file name; row-based categories carry the two queries
//! (collect every PartCode, count one PartCode) against their source table.

use depsync_common::config::RootId;

/// Naming rule for one directory level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPattern {
    /// Exactly four ASCII letters
    Alpha4,
    /// Exactly four ASCII letters or digits
    Alnum4,
    /// Any subdirectory
    Any,
}

impl DirPattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            DirPattern::Alpha4 => {
                name.chars().count() == 4 && name.chars().all(|c| c.is_ascii_alphabetic())
            }
            DirPattern::Alnum4 => {
                name.chars().count() == 4 && name.chars().all(|c| c.is_ascii_alphanumeric())
            }
            DirPattern::Any => true,
        }
    }
}

/// One directory level between a root and the evidence files
///
/// `code_slice` names the character range of the PartCode that selects the
/// directory directly during an individual probe. Unkeyed levels are
/// enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirLevel {
    pub pattern: DirPattern,
    pub code_slice: Option<(usize, usize)>,
}

const BUCKET_LAYOUT: &[DirLevel] = &[DirLevel {
    pattern: DirPattern::Alpha4,
    code_slice: Some((0, 4)),
}];

const MICA_LAYOUT: &[DirLevel] = &[
    DirLevel {
        pattern: DirPattern::Alpha4,
        code_slice: Some((0, 4)),
    },
    DirLevel {
        pattern: DirPattern::Any,
        code_slice: None,
    },
];

const SHEET_METAL_LAYOUT: &[DirLevel] = &[
    DirLevel {
        pattern: DirPattern::Alnum4,
        code_slice: Some((0, 4)),
    },
    DirLevel {
        pattern: DirPattern::Alnum4,
        code_slice: Some((4, 8)),
    },
];

/// How a PartCode is derived from a file or directory name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// File stem is the PartCode
    Direct,
    /// `<prefix>_<suffix>[_...]` becomes `<prefix>.<suffix>`
    SplitRejoin,
    /// Directory name is the PartCode when long enough
    DirectoryName { min_len: usize },
    /// First eight characters of the stem, reshaped to `XXXX.XXX` unless
    /// they already contain a dot
    TruncateDot,
}

impl Extraction {
    /// Derive a PartCode from a file name (or directory name), `None` when
    /// the name does not fit the rule
    pub fn derive(&self, name: &str) -> Option<String> {
        match self {
            Extraction::DirectoryName { min_len } => {
                if name.chars().count() >= *min_len {
                    Some(name.to_string())
                } else {
                    None
                }
            }
            Extraction::Direct => {
                let stem = file_stem(name)?;
                Some(stem.to_string())
            }
            Extraction::SplitRejoin => {
                let stem = file_stem(name)?;
                let mut segments = stem.split('_');
                let prefix = segments.next()?;
                let suffix = segments.next()?;
                Some(format!("{}.{}", prefix, suffix))
            }
            Extraction::TruncateDot => {
                let stem = file_stem(name)?;
                let chars: Vec<char> = stem.chars().collect();
                if chars.len() < 8 {
                    return None;
                }
                let head: String = chars[..8].iter().collect();
                if head.contains('.') {
                    return Some(head);
                }
                let prefix: String = chars[..4].iter().collect();
                let suffix: String = chars[4..7].iter().collect();
                Some(format!("{}.{}", prefix, suffix))
            }
        }
    }
}

/// Name without its last extension; `None` when nothing precedes the dot
pub(crate) fn file_stem(name: &str) -> Option<&str> {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    Some(stem).filter(|s| !s.is_empty())
}

/// Individual-mode test applied to files found at the end of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileProbe {
    /// A file whose derived PartCode equals the probed code
    Derived,
    /// A file whose stem starts with the probed code
    Prefix,
}

/// Where a category's evidence lives
#[derive(Debug, Clone, Copy)]
pub enum EvidenceSource {
    Files {
        root: RootId,
        levels: &'static [DirLevel],
        extension: &'static str,
        extraction: Extraction,
        probe: FileProbe,
    },
    Directories {
        root: RootId,
        min_len: usize,
    },
    Rows {
        /// Returns one PartCode per row (duplicates allowed)
        collect_sql: &'static str,
        /// `COUNT(*)` bound to one PartCode parameter
        count_sql: &'static str,
    },
}

/// Static descriptor of one evidence category
#[derive(Debug, Clone, Copy)]
pub struct EvidenceCategory {
    pub id: u8,
    pub counter_code: &'static str,
    pub staging_table: &'static str,
    pub description: &'static str,
    pub source: EvidenceSource,
}

impl EvidenceCategory {
    /// Flag column in `dependency_records`
    pub fn flag_column(&self) -> String {
        format!("dep{:02}", self.id)
    }

    /// Storage root scanned by this category, if file-based
    pub fn root(&self) -> Option<RootId> {
        match self.source {
            EvidenceSource::Files { root, .. } | EvidenceSource::Directories { root, .. } => {
                Some(root)
            }
            EvidenceSource::Rows { .. } => None,
        }
    }
}

const fn bucket_files(root: RootId, extension: &'static str) -> EvidenceSource {
    EvidenceSource::Files {
        root,
        levels: BUCKET_LAYOUT,
        extension,
        extraction: Extraction::Direct,
        probe: FileProbe::Derived,
    }
}

/// Category 1, whose file is the mother sheet
pub fn mother_sheet() -> &'static EvidenceCategory {
    &CATALOG[0]
}

/// The seventeen categories in processing order
pub static CATALOG: [EvidenceCategory; 17] = [
    EvidenceCategory {
        id: 1,
        counter_code: "010",
        staging_table: "staging_dep01_mother_sheets",
        description: "Mother sheet",
        source: bucket_files(RootId::MotherSheets, "tif"),
    },
    EvidenceCategory {
        id: 2,
        counter_code: "020",
        staging_table: "staging_dep02_method_docs",
        description: "Method document",
        source: bucket_files(RootId::MethodDocs, "xls"),
    },
    EvidenceCategory {
        id: 3,
        counter_code: "030",
        staging_table: "staging_dep03_change_sheets",
        description: "Change sheet",
        source: bucket_files(RootId::ChangeSheets, "tif"),
    },
    EvidenceCategory {
        id: 4,
        counter_code: "040",
        staging_table: "staging_dep04_bills_of_materials",
        description: "Bill of materials",
        source: bucket_files(RootId::BillsOfMaterials, "xls"),
    },
    EvidenceCategory {
        id: 5,
        counter_code: "050",
        staging_table: "staging_dep05_plans_and_documents",
        description: "Plan and document",
        source: bucket_files(RootId::PlansAndDocuments, "tif"),
    },
    EvidenceCategory {
        id: 6,
        counter_code: "060",
        staging_table: "staging_dep06_modified_requests",
        description: "Improvement request, modification done",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT part_code FROM improvement_requests WHERE modified_at IS NOT NULL",
            count_sql: "SELECT COUNT(*) FROM improvement_requests WHERE modified_at IS NOT NULL AND part_code = ?",
        },
    },
    EvidenceCategory {
        id: 7,
        counter_code: "070",
        staging_table: "staging_dep07_pending_requests",
        description: "Improvement request, modification pending",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT part_code FROM improvement_requests WHERE modified_at IS NULL",
            count_sql: "SELECT COUNT(*) FROM improvement_requests WHERE modified_at IS NULL AND part_code = ?",
        },
    },
    EvidenceCategory {
        id: 8,
        counter_code: "080",
        staging_table: "staging_dep08_mica",
        description: "Mica drawing",
        source: EvidenceSource::Files {
            root: RootId::Mica,
            levels: MICA_LAYOUT,
            extension: "dxf",
            extraction: Extraction::SplitRejoin,
            probe: FileProbe::Derived,
        },
    },
    EvidenceCategory {
        id: 9,
        counter_code: "090",
        staging_table: "staging_dep09_sheet_metal",
        description: "Sheet metal program",
        source: EvidenceSource::Files {
            root: RootId::SheetMetal,
            levels: SHEET_METAL_LAYOUT,
            extension: "jgf",
            extraction: Extraction::SplitRejoin,
            probe: FileProbe::Derived,
        },
    },
    EvidenceCategory {
        id: 10,
        counter_code: "100",
        staging_table: "staging_dep10_plan_list",
        description: "Listed plan",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT article_code FROM plan_list",
            count_sql: "SELECT COUNT(*) FROM plan_list WHERE article_code = ?",
        },
    },
    EvidenceCategory {
        id: 11,
        counter_code: "110",
        staging_table: "staging_dep11_declared_plans",
        description: "Declared plan",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT part_code FROM declared_plans",
            count_sql: "SELECT COUNT(*) FROM declared_plans WHERE part_code = ?",
        },
    },
    EvidenceCategory {
        id: 12,
        counter_code: "120",
        staging_table: "staging_dep12_changes_done",
        description: "Mother sheet change, completed",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT part_code FROM mother_sheet_changes \
                WHERE completed_at IS NOT NULL \
                AND (sheet_metal_change = 0 OR sheet_metal_changed_at IS NOT NULL) \
                AND (code_change = 0 OR code_changed_at IS NOT NULL)",
            count_sql: "SELECT COUNT(*) FROM mother_sheet_changes \
                WHERE completed_at IS NOT NULL \
                AND (sheet_metal_change = 0 OR sheet_metal_changed_at IS NOT NULL) \
                AND (code_change = 0 OR code_changed_at IS NOT NULL) \
                AND part_code = ?",
        },
    },
    EvidenceCategory {
        id: 13,
        counter_code: "130",
        staging_table: "staging_dep13_changes_pending",
        description: "Mother sheet change, pending",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT part_code FROM mother_sheet_changes \
                WHERE completed_at IS NULL \
                OR (sheet_metal_change = 1 AND sheet_metal_changed_at IS NULL) \
                OR (code_change = 1 AND code_changed_at IS NULL)",
            count_sql: "SELECT COUNT(*) FROM mother_sheet_changes \
                WHERE (completed_at IS NULL \
                OR (sheet_metal_change = 1 AND sheet_metal_changed_at IS NULL) \
                OR (code_change = 1 AND code_changed_at IS NULL)) \
                AND part_code = ?",
        },
    },
    EvidenceCategory {
        id: 14,
        counter_code: "140",
        staging_table: "staging_dep14_scanned_method_docs",
        description: "Scanned method document",
        source: bucket_files(RootId::ScannedMethodDocs, "tif"),
    },
    EvidenceCategory {
        id: 15,
        counter_code: "150",
        staging_table: "staging_dep15_markings",
        description: "Marking",
        source: EvidenceSource::Directories {
            root: RootId::Markings,
            min_len: 4,
        },
    },
    EvidenceCategory {
        id: 16,
        counter_code: "160",
        staging_table: "staging_dep16_photos",
        description: "Photo",
        source: EvidenceSource::Files {
            root: RootId::Photos,
            levels: BUCKET_LAYOUT,
            extension: "jpg",
            extraction: Extraction::TruncateDot,
            probe: FileProbe::Prefix,
        },
    },
    EvidenceCategory {
        id: 17,
        counter_code: "170",
        staging_table: "staging_dep17_nonconformity_returns",
        description: "Nonconformity return",
        source: EvidenceSource::Rows {
            collect_sql: "SELECT reference FROM nonconformity_returns WHERE return_type = 'NC' AND lht <> ''",
            count_sql: "SELECT COUNT(*) FROM nonconformity_returns WHERE return_type = 'NC' AND lht <> '' AND reference = ?",
        },
    },
];
