//! Configuration for quota-rs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QuotaError, Result};
use crate::policy::PolicyTable;
use crate::provider::ProviderMode;

/// Environment variable overriding the configured provider mode
pub const MODE_ENV_VAR: &str = "QUOTA_MODE";

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Provider mode, fixed for the process lifetime
    #[serde(default)]
    pub mode: ProviderMode,
    /// Storage locations
    pub storage: StorageConfig,
    /// Identity answers for the simulation
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tier limits
    #[serde(default)]
    pub policy: PolicyTable,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// JSON file backing the durable key-value store
    pub state_path: String,
    /// JSON file listing the tracked items
    #[serde(default = "default_items_path")]
    pub items_path: String,
}

/// Identity configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Whether this device already belongs to a registered account
    #[serde(default)]
    pub device_registered: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_items_path() -> String {
    "items.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl QuotaConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QuotaError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| QuotaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create a default development configuration
    pub fn development() -> Self {
        Self {
            mode: ProviderMode::Simulation,
            storage: StorageConfig {
                state_path: "quota-state.json".to_string(),
                items_path: default_items_path(),
            },
            identity: IdentityConfig::default(),
            logging: LoggingConfig::default(),
            policy: PolicyTable::default(),
        }
    }

    /// Apply `QUOTA_MODE` if set
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(MODE_ENV_VAR) {
            self.mode = ProviderMode::parse(&value).ok_or_else(|| {
                QuotaError::Config(format!("Invalid {} value '{}'", MODE_ENV_VAR, value))
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.state_path.trim().is_empty() {
            return Err(QuotaError::Config("storage.state_path is empty".to_string()));
        }
        if self.storage.items_path.trim().is_empty() {
            return Err(QuotaError::Config("storage.items_path is empty".to_string()));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(QuotaError::Config(format!(
                    "Unknown logging format '{}'",
                    other
                )))
            }
        }
        self.policy.validate()
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self::development()
    }
}
