//! Potluck sync CLI entry point

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use potluck_cli::{
    cli::{Cli, Commands},
    config::CliAppConfig,
    demo::DemoRunner,
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration before logging so the file can enable verbose output
    let config = CliAppConfig::load(cli.config.as_deref())?;
    setup_logging(cli.verbose || config.cli.verbose);

    if let Err(e) = execute(cli.command, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn execute(command: Commands, mut config: CliAppConfig) -> Result<()> {
    match command {
        Commands::Demo { json, latency_ms } => {
            if let Some(latency_ms) = latency_ms {
                config.demo.latency_ms = latency_ms;
            }
            info!(
                "Running demo as {} in conversation {}",
                config.demo.viewer, config.demo.conversation
            );
            let report = DemoRunner::new(config).run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.messages)?);
            } else {
                print!("{}", report.render());
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

/// Setup logging from `RUST_LOG`, falling back to the verbosity flag
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
