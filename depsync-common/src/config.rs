//! Configuration loading and resolution
//!
//! Every value is resolved in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The backend descriptor is the one value without a compiled default: a
//! missing or malformed descriptor is a configuration fault and the process
//! must not start a run.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "DEPSYNC_CONFIG";
/// Environment variable carrying the backend descriptor
pub const ENV_DATABASE_URL: &str = "DEPSYNC_DATABASE_URL";
/// Environment variable for the directory holding every evidence root
pub const ENV_EVIDENCE_BASE: &str = "DEPSYNC_EVIDENCE_BASE";
pub const ENV_LOG_LEVEL: &str = "DEPSYNC_LOG_LEVEL";
pub const ENV_EXECUTION_TIME: &str = "DEPSYNC_EXECUTION_TIME";
pub const ENV_RETRY_ATTEMPTS: &str = "DEPSYNC_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY_SECONDS: &str = "DEPSYNC_RETRY_DELAY_SECONDS";

const DEFAULT_EXECUTION_TIME: &str = "02:00";
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "info";

/// One configured evidence storage root
///
/// Eleven roots exist. `Data` carries no category of its own but must be
/// reachable for a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootId {
    Data,
    MotherSheets,
    MethodDocs,
    ChangeSheets,
    BillsOfMaterials,
    PlansAndDocuments,
    Mica,
    SheetMetal,
    ScannedMethodDocs,
    Markings,
    Photos,
}

impl RootId {
    /// Every root, in preflight order
    pub const ALL: [RootId; 11] = [
        RootId::Data,
        RootId::MotherSheets,
        RootId::MethodDocs,
        RootId::ChangeSheets,
        RootId::BillsOfMaterials,
        RootId::PlansAndDocuments,
        RootId::Mica,
        RootId::SheetMetal,
        RootId::ScannedMethodDocs,
        RootId::Markings,
        RootId::Photos,
    ];

    /// Key used in the `[roots]` TOML table and as the default directory name
    pub fn key(&self) -> &'static str {
        match self {
            RootId::Data => "data",
            RootId::MotherSheets => "mother_sheets",
            RootId::MethodDocs => "method_docs",
            RootId::ChangeSheets => "change_sheets",
            RootId::BillsOfMaterials => "bills_of_materials",
            RootId::PlansAndDocuments => "plans_and_documents",
            RootId::Mica => "mica",
            RootId::SheetMetal => "sheet_metal",
            RootId::ScannedMethodDocs => "scanned_method_docs",
            RootId::Markings => "markings",
            RootId::Photos => "photos",
        }
    }
}

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Resolved filesystem location of every evidence root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRoots {
    paths: BTreeMap<RootId, PathBuf>,
}

impl EvidenceRoots {
    /// All roots laid out as `<base>/<root key>`
    pub fn under(base: &Path) -> Self {
        let paths = RootId::ALL
            .iter()
            .map(|id| (*id, base.join(id.key())))
            .collect();
        Self { paths }
    }

    /// Replace the location of one root
    pub fn with(mut self, id: RootId, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(id, path.into());
        self
    }

    pub fn get(&self, id: RootId) -> &Path {
        // Every constructor fills all eleven keys
        self.paths
            .get(&id)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RootId, &Path)> {
        self.paths.iter().map(|(id, path)| (*id, path.as_path()))
    }
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Backend connection descriptor (`sqlite:` URL)
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub roots: RootsConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[roots]` table: a common base plus optional per-root overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootsConfig {
    pub base: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub mother_sheets: Option<PathBuf>,
    pub method_docs: Option<PathBuf>,
    pub change_sheets: Option<PathBuf>,
    pub bills_of_materials: Option<PathBuf>,
    pub plans_and_documents: Option<PathBuf>,
    pub mica: Option<PathBuf>,
    pub sheet_metal: Option<PathBuf>,
    pub scanned_method_docs: Option<PathBuf>,
    pub markings: Option<PathBuf>,
    pub photos: Option<PathBuf>,
}

impl RootsConfig {
    fn override_for(&self, id: RootId) -> Option<&PathBuf> {
        match id {
            RootId::Data => self.data.as_ref(),
            RootId::MotherSheets => self.mother_sheets.as_ref(),
            RootId::MethodDocs => self.method_docs.as_ref(),
            RootId::ChangeSheets => self.change_sheets.as_ref(),
            RootId::BillsOfMaterials => self.bills_of_materials.as_ref(),
            RootId::PlansAndDocuments => self.plans_and_documents.as_ref(),
            RootId::Mica => self.mica.as_ref(),
            RootId::SheetMetal => self.sheet_metal.as_ref(),
            RootId::ScannedMethodDocs => self.scanned_method_docs.as_ref(),
            RootId::Markings => self.markings.as_ref(),
            RootId::Photos => self.photos.as_ref(),
        }
    }
}

/// `[schedule]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Daily time of day, `HH:MM`
    pub execution_time: Option<String>,
}

/// `[retry]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    pub delay_seconds: Option<u64>,
}

/// `[logging]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Option<String>,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub evidence_base: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved settings consumed by the engine and the binary
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub roots: EvidenceRoots,
    pub execution_time: String,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub log_level: String,
}

/// Resolve settings from CLI overrides, environment, TOML file and defaults
pub fn load_settings(overrides: &Overrides) -> Result<Settings> {
    let toml_config = match locate_config_file(overrides.config_path.as_deref()) {
        Some(path) => load_toml_config(&path)?,
        None => {
            warn!("No configuration file found, using environment and compiled defaults");
            TomlConfig::default()
        }
    };

    resolve_settings(overrides, &toml_config)
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Merge overrides, environment and an already-parsed TOML config
pub fn resolve_settings(overrides: &Overrides, toml_config: &TomlConfig) -> Result<Settings> {
    let database_url = overrides
        .database_url
        .clone()
        .or_else(|| env_string(ENV_DATABASE_URL))
        .or_else(|| toml_config.database_url.clone())
        .ok_or_else(|| {
            Error::Config(format!(
                "Database descriptor not configured. Use --database, {} or `database_url` in the TOML file",
                ENV_DATABASE_URL
            ))
        })?;
    validate_database_url(&database_url)?;

    let base = overrides
        .evidence_base
        .clone()
        .or_else(|| env_string(ENV_EVIDENCE_BASE).map(PathBuf::from))
        .or_else(|| toml_config.roots.base.clone())
        .unwrap_or_else(default_evidence_base);

    let mut roots = EvidenceRoots::under(&base);
    for id in RootId::ALL {
        if let Some(path) = toml_config.roots.override_for(id) {
            roots = roots.with(id, path.clone());
        }
    }

    let execution_time = env_string(ENV_EXECUTION_TIME)
        .or_else(|| toml_config.schedule.execution_time.clone())
        .unwrap_or_else(|| DEFAULT_EXECUTION_TIME.to_string());

    let retry_attempts = env_parsed::<u32>(ENV_RETRY_ATTEMPTS)
        .or(toml_config.retry.attempts)
        .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
        .max(1);

    let retry_delay_seconds = env_parsed::<u64>(ENV_RETRY_DELAY_SECONDS)
        .or(toml_config.retry.delay_seconds)
        .unwrap_or(DEFAULT_RETRY_DELAY_SECONDS);

    let log_level = overrides
        .log_level
        .clone()
        .or_else(|| env_string(ENV_LOG_LEVEL))
        .or_else(|| toml_config.logging.level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    Ok(Settings {
        database_url,
        roots,
        execution_time,
        retry_attempts,
        retry_delay: Duration::from_secs(retry_delay_seconds),
        log_level,
    })
}

/// Only SQLite descriptors are understood by the backend adapter
pub fn validate_database_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::Config("Database descriptor is empty".to_string()));
    }
    if !url.starts_with("sqlite:") {
        return Err(Error::Config(format!(
            "Unsupported database descriptor '{}': expected a sqlite: URL",
            url
        )));
    }
    Ok(())
}

fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(path) = env_string(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("depsync").join("depsync.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/depsync/depsync.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default location of the evidence roots
fn default_evidence_base() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("depsync").join("evidence"))
        .unwrap_or_else(|| PathBuf::from("./depsync_evidence"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}='{}', falling back", name, raw);
            None
        }
    }
}
