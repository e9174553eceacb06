//! Street Trees CLI Binary
//!
//! Command-line interface for the Street Trees persistence stack.

use clap::Parser;
use std::process;
use street_trees::cli::{map_error, Cli, RunContext};
use street_trees::config::ConfigLoader;
use street_trees::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_config = match build_logging_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging options: {}", map_error(&e));
            process::exit(2);
        }
    };
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    info!("street-trees CLI starting");

    let context = match RunContext::new(cli.root.clone(), cli.config.clone(), cli.in_memory) {
        Ok(context) => context,
        Err(e) => {
            error!("Error loading configuration: {e:#}");
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&cli.command).await {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{output}");
        }
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Build logging configuration from CLI args and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> anyhow::Result<LoggingConfig> {
    let loaded = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(&cli.root),
    };
    let mut config = loaded.map(|c| c.logging).unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.parse()?;
    }
    Ok(config)
}
