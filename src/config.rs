//! Storage configuration, persisted as TOML.
//!
//! Decides which repository kinds are backed by a persistent store (a base path is
//! configured) and which live in memory, and carries the tuning knobs for the handle
//! cache and the lock-retry policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::RepositoryKind;
use crate::error::ConfigError;

/// Retry policy knobs for transient `RepositoryLocked` conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// How many times acquisition is retried after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Random spread applied to each delay, as a fraction in [0.0, 1.0].
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Configuration of the repository layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the `ENTITIES` repositories. `None` keeps them in memory.
    #[serde(default)]
    pub entities_path: Option<PathBuf>,
    /// Base directory for the `TRANSACTIONS` repositories.
    #[serde(default)]
    pub transactions_path: Option<PathBuf>,
    /// Base directory for the `SCHEMA` repositories.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Base directory for every other repository kind.
    #[serde(default)]
    pub default_path: Option<PathBuf>,
    /// Idle time after which a cached repository handle is re-created.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// Maximum number of concurrently open connections per repository.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Capacity (in chunks) of the piped buffer feeding the import parser.
    #[serde(default = "default_import_buffer_chunks")]
    pub import_buffer_chunks: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_idle_ttl_secs() -> u64 {
    60 * 60
}
fn default_max_connections() -> usize {
    64
}
fn default_import_buffer_chunks() -> usize {
    16
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            entities_path: None,
            transactions_path: None,
            schema_path: None,
            default_path: None,
            idle_ttl_secs: default_idle_ttl_secs(),
            max_connections: default_max_connections(),
            import_buffer_chunks: default_import_buffer_chunks(),
            retry: RetryConfig::default(),
        }
    }
}

impl StorageConfig {
    /// A config where every repository kind is persisted below `base`.
    pub fn persistent(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            entities_path: Some(base.clone()),
            transactions_path: Some(base.clone()),
            schema_path: Some(base.clone()),
            default_path: Some(base),
            ..Default::default()
        }
    }

    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render the config as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                message: "max_connections must be > 0".into(),
            });
        }
        if self.import_buffer_chunks == 0 {
            return Err(ConfigError::Invalid {
                message: "import_buffer_chunks must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid {
                message: format!("retry.jitter must be within [0, 1], got {}", self.retry.jitter),
            });
        }
        Ok(())
    }

    /// Base directory configured for a repository kind, if any.
    pub fn storage_path(&self, kind: RepositoryKind) -> Option<&Path> {
        let path = match kind {
            RepositoryKind::Entities => &self.entities_path,
            RepositoryKind::Transactions => &self.transactions_path,
            RepositoryKind::Schema => &self.schema_path,
            RepositoryKind::Application => &self.default_path,
        };
        path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}
