//! FlowScope configuration
//!
//! Loads settings from an optional TOML file, then applies environment
//! overrides. Read once at startup by the owning process; the statistics
//! core itself never touches configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use fs_common::{CleanerConfig, CollectionConfig, NodeIdentity};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP introspection server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8290 }
    }
}

/// Top-level FlowScope configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowScopeConfig {
    pub collection: CollectionConfig,
    pub cleaner: CleanerConfig,
    pub api: ApiConfig,
    pub node: NodeIdentity,
}

impl FlowScopeConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Environment variables win over file values
    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = read_env_bool("FLOWSCOPE_COLLECTION_ENABLED")? {
            self.collection.enabled = v;
        }
        if let Some(v) = read_env_bool("FLOWSCOPE_CLEANER_ENABLED")? {
            self.cleaner.enabled = v;
        }
        if let Some(v) = read_env_parse::<u64>("FLOWSCOPE_CLEANER_INTERVAL_SECS")? {
            self.cleaner.interval_secs = v;
        }
        if let Some(v) = read_env_parse::<u16>("FLOWSCOPE_API_PORT")? {
            self.api.port = v;
        }
        if let Ok(v) = std::env::var("FLOWSCOPE_NODE_HOST") {
            self.node.host = Some(v);
        }
        if let Some(v) = read_env_parse::<u16>("FLOWSCOPE_NODE_PORT")? {
            self.node.port = Some(v);
        }
        Ok(())
    }
}

fn read_env_bool(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn read_env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
