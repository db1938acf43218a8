//! Potluck CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `potluck.toml` in the working directory
//! - The file passed with `--config`
//! - Environment variables (`POTLUCK_*`, nested with `__`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use potluck_core::SyncConfig;

const DEFAULT_CONFIG_FILE: &str = "potluck.toml";
const ENV_PREFIX: &str = "POTLUCK_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Potluck CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Engine configuration handed to the session builder
    pub sync: SyncConfig,
    pub cli: CliConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,
}

/// Participants and pacing of the scripted demo session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub viewer: String,
    pub peer: String,
    pub conversation: String,
    /// Simulated backend latency per call
    pub latency_ms: u64,
    /// Upper bound on each wait for asynchronous progress
    pub step_timeout_ms: u64,
    pub search_query: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            viewer: "alice".to_string(),
            peer: "bob".to_string(),
            conversation: "dinner-plans".to_string(),
            latency_ms: 20,
            step_timeout_ms: 5_000,
            search_query: "pasta".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl CliAppConfig {
    /// Load configuration from every layer, then validate it
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Some(path) = config_path {
            if !Path::new(path).is_file() {
                return Err(ConfigError::FileSystem(format!(
                    "Configuration file not found: {}",
                    path
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: CliAppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.demo.viewer.trim().is_empty() || self.demo.peer.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Demo participants must not be empty".to_string(),
            ));
        }
        if self.demo.viewer == self.demo.peer {
            return Err(ConfigError::Validation(
                "Demo viewer and peer must be different users".to_string(),
            ));
        }
        if self.demo.conversation.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Demo conversation id must not be empty".to_string(),
            ));
        }
        if self.demo.step_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Demo step timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the resolved configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
