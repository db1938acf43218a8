//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "potluck-sync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted session against the in-memory backend
    Demo {
        /// Print the final message list as JSON
        #[arg(long)]
        json: bool,
        /// Override the simulated backend latency in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,
    },
    /// Print the resolved configuration as TOML
    Config,
}
