//! Configuration loading for fleetsync.
//!
//! Configuration is loaded from a TOML file (default: `fleetsync.toml`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_types::Collection;

use crate::engine::EngineConfig;

/// Root configuration for fleetsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Remote data store configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Sync engine configuration.
    #[serde(default)]
    pub engine: EngineSection,
    /// Per-collection settings.
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Remote data store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the REST endpoint (default: http://localhost:3000).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key sent as `apikey` header and bearer token (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Timeout in seconds for every remote call (default: 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Transient failures tolerated before an entry is FAILED (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Periodic run interval in seconds, 0 disables (default: 60).
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,
}

/// Settings for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection (table) name.
    pub name: String,
    /// Natural/composite key used by upserts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_key: Vec<String>,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("fleetsync.db")
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    sync_core::DEFAULT_MAX_RETRIES
}

fn default_periodic_interval() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            periodic_interval_secs: default_periodic_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.remote.base_url.starts_with("http://")
            || self.remote.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "remote.base_url must be an http(s) URL, got {:?}",
                self.remote.base_url
            )));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "remote.timeout_secs must be greater than 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            Collection::new(collection.name.as_str())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(collection.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "collection {:?} is declared twice",
                    collection.name
                )));
            }
            if collection.conflict_key.iter().any(|f| f.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "collection {:?} has an empty conflict key field",
                    collection.name
                )));
            }
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let periodic = match self.engine.periodic_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let remote_timeout = Duration::from_secs(self.remote.timeout_secs);
        let defaults = EngineConfig::default();
        let lease_ttl = defaults.lease_ttl.max(remote_timeout * 3);
        defaults
            .with_max_retries(self.engine.max_retries)
            .with_remote_timeout(remote_timeout)
            .with_periodic_interval(periodic)
            .with_lease_ttl(lease_ttl)
    }

    /// Declared conflict key for a collection (empty if none).
    pub fn conflict_key(&self, collection: &str) -> Vec<String> {
        self.collections
            .iter()
            .find(|c| c.name == collection)
            .map(|c| c.conflict_key.clone())
            .unwrap_or_default()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(toml::ser::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
