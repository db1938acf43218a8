//! Potluck CLI library
//!
//! Configuration loading, argument parsing and the scripted demo session
//! behind the `potluck-sync` binary.

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::{CliAppConfig, ConfigError};
pub use demo::{DemoReport, DemoRunner};
pub use error::{CliError, Result};
