//! CLI parse: clap types for street-trees. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Street Trees CLI - local tree inventory store
#[derive(Parser, Debug)]
#[command(name = "street-trees")]
#[command(about = "Manage the local Street Trees store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root holding street-trees.toml
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use an ephemeral in-memory store
    #[arg(long)]
    pub in_memory: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the configured store
    Init,
    /// Import trees from a JSON array
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// List stored trees
    List {
        /// Only trees of this species
        #[arg(long)]
        species: Option<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// Destroy and recreate the store
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Text,
    Json,
}
