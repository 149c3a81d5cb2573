//! Storage configuration.
//!
//! Supports YAML file and environment variable overrides.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::storage::Dialect;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "AGGREGATE_STORAGE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "storage.yaml";

/// Connection and table settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQL dialect (sqlite, postgres).
    pub dialect: Dialect,
    /// Connection URL understood by sqlx.
    pub url: String,
    /// Upper bound of the connection pool.
    pub max_connections: u32,
    /// Default streaming batch size for history reads.
    pub history_batch_size: usize,
    /// Write single-row tables with `INSERT .. ON CONFLICT`.
    /// Unset means the dialect decides.
    pub native_upsert: Option<bool>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            url: "sqlite://./data/aggregates.db?mode=rwc".to_string(),
            max_connections: 5,
            history_batch_size: 100,
            native_upsert: None,
        }
    }
}

impl StorageConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("STORAGE_URL") {
            self.url = url;
        }

        if let Ok(dialect) = std::env::var("STORAGE_DIALECT") {
            self.dialect = dialect.parse()?;
        }

        if let Ok(max) = std::env::var("STORAGE_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse() {
                self.max_connections = m;
            }
        }

        Ok(())
    }
}
