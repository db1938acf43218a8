//! Error handling for the Potluck CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Sync engine error: {0}")]
    Sync(#[from] potluck_core::SyncError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Demo step failed: {0}")]
    Demo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<potluck_runtime::SendFailure> for CliError {
    fn from(failure: potluck_runtime::SendFailure) -> Self {
        CliError::Sync(failure.into_error())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Demo(err.to_string())
    }
}
