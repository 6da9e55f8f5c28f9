//! Store configuration (YAML)
//!
//! ```yaml
//! version: 1
//! database:
//!   path: /var/lib/contentrepo/store.db   # omit for an in-memory store
//!   busy_timeout_ms: 5000
//! batch_size: 1000
//! cache_enabled: false
//! logging:
//!   filter: info
//!   ansi: true
//! kinds:
//!   - name: rpm.rpm
//!     content_types: [rpm.package, rpm.advisory]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{KindRegistry, SimpleKind};
use crate::{ErrorKind, StorageError};

/// Host parameters SQLite binds in one statement
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Largest IN-list. A ledger query binds up to three more parameters
/// (repository, adder, remover) next to it.
pub const MAX_BATCH_SIZE: usize = SQLITE_MAX_VARIABLES - 3;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: 1")]
    UnsupportedVersion { found: u32 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Anything else that makes the configuration unusable
    #[error("{0}")]
    Invalid(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::new(ErrorKind::Config, err.to_string()).with_source(err)
    }
}

/// Database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite file; `None` keeps everything in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// How long a writer waits for the database lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            ansi: true,
        }
    }
}

/// Extra repository kind with a fixed content-type list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindConfig {
    pub name: String,
    pub content_types: Vec<String>,
}

/// Store configuration, YAML schema v1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Upper bound on ids per IN-list query
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Invalidate the content cache on structural changes
    #[serde(default)]
    pub cache_enabled: bool,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Kinds registered next to the built-in `file.file`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<KindConfig>,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            database: DatabaseConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            cache_enabled: false,
            logging: LoggingConfig::default(),
            kinds: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// In-memory store with defaults
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// SQLite store at `path` with defaults
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.database.path = Some(path.into());
        config
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Load and validate a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.version != 1 {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
            });
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::Range {
                field: "batch_size".to_string(),
                value: self.batch_size.to_string(),
                min: "1".to_string(),
                max: MAX_BATCH_SIZE.to_string(),
            });
        }
        for kind in &self.kinds {
            if kind.name.is_empty() || kind.content_types.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Kind '{}' needs a name and at least one content type",
                    kind.name
                )));
            }
        }
        Ok(())
    }

    /// Built-in kinds plus the configured ones
    pub fn kind_registry(&self) -> KindRegistry {
        let mut registry = KindRegistry::default();
        for kind in &self.kinds {
            registry.register(Arc::new(SimpleKind::new(
                kind.name.clone(),
                kind.content_types.clone(),
            )));
        }
        registry
    }
}
