//! Application configuration for Scriptorium.
//!
//! User config lives at `~/.scriptorium/scriptorium.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, ScriptoriumError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "scriptorium.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".scriptorium";

// ---------------------------------------------------------------------------
// Config structs (matching scriptorium.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local module store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Transfer and batch settings.
    #[serde(default)]
    pub repository: RepositorySettings,

    /// Remote sources. Empty means the built-in source list.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    /// Assembly output settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Extra versification definitions.
    #[serde(default)]
    pub versification: VersificationConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the module store (`mods.d/` + `modules/`).
    #[serde(default = "default_store_root")]
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> String {
    "~/.sword".into()
}

/// `[repository]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Maximum modules processed at once in batch operations.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempt ceiling for transient failures (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the exponential backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Overall deadline for a batch operation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_deadline_secs: Option<u64>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            batch_deadline_secs: None,
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    4
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}

/// `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Unique display name.
    pub name: String,
    /// `ftp`, `http` or `https`.
    pub protocol: String,
    pub host: String,
    /// Base directory holding `mods.d.tar.gz`.
    pub directory: String,
    /// Package URL path templates; empty means the defaults for the layout.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_patterns: Vec<String>,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `book`, `chapter` or `verse`.
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
        }
    }
}

fn default_granularity() -> String {
    "chapter".into()
}

/// `[versification]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersificationConfig {
    /// TOML definition files loaded after the built-in systems.
    #[serde(default)]
    pub extra_definitions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Repository config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime repository configuration, passed explicitly to the manager.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Module store root.
    pub root: PathBuf,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub batch_deadline: Option<Duration>,
    /// Configured sources; empty means the built-in list.
    pub sources: Vec<SourceEntry>,
}

impl RepositoryConfig {
    /// Merge the file config, expanding `~` in the store root.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let settings = &config.repository;
        if settings.concurrency == 0 {
            return Err(ScriptoriumError::config("repository.concurrency must be at least 1"));
        }
        if settings.max_attempts == 0 {
            return Err(ScriptoriumError::config("repository.max_attempts must be at least 1"));
        }
        Ok(Self {
            root: expand_home(&config.store.root)?,
            concurrency: settings.concurrency as usize,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            batch_deadline: settings.batch_deadline_secs.map(Duration::from_secs),
            sources: config.sources.clone(),
        })
    }

    /// Defaults rooted at `root`, for tests and embedding.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let settings = RepositorySettings::default();
        Self {
            root: root.into(),
            concurrency: settings.concurrency as usize,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            batch_deadline: None,
            sources: Vec::new(),
        }
    }
}

/// Reject duplicate source names (case-insensitive).
pub fn validate_sources(sources: &[SourceEntry]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for s in sources {
        if !seen.insert(s.name.to_ascii_lowercase()) {
            return Err(ConfigError::DuplicateSource(s.name.clone()).into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.scriptorium/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ScriptoriumError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.scriptorium/scriptorium.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScriptoriumError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ScriptoriumError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_sources(&config.sources)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScriptoriumError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ScriptoriumError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScriptoriumError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return dirs::home_dir()
            .ok_or_else(|| ScriptoriumError::config("could not determine home directory"));
    }
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ScriptoriumError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
