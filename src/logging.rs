//! Logging System
//!
//! Structured logging built on `tracing`. The library only emits events; binaries install a
//! subscriber through `init_logging`, configured from `LoggingConfig` and overridden by the
//! `STREET_TREES_LOG*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_FILTER: &str = "STREET_TREES_LOG";
const ENV_FORMAT: &str = "STREET_TREES_LOG_FORMAT";
const ENV_OUTPUT: &str = "STREET_TREES_LOG_OUTPUT";
const ENV_MODULES: &str = "STREET_TREES_LOG_MODULES";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!(
                "Invalid log format: {other} (must be 'json' or 'text')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl std::str::FromStr for LogOutput {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ConfigError::Invalid(format!(
                "Invalid log output: {other} (must be 'stdout', 'stderr' or 'file')"
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file path when `output` is `file`
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Colored output (text format on a terminal stream only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("org", "streettrees", "street-trees")
        .map(|dirs| dirs.data_dir().join("street-trees.log"))
        .unwrap_or_else(|| PathBuf::from(".street-trees/street-trees.log"))
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Install the global subscriber
///
/// Priority order (highest to lowest):
/// 1. Environment variables (STREET_TREES_LOG, STREET_TREES_LOG_FORMAT, ...)
/// 2. Configuration
/// 3. Defaults
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ConfigError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = match std::env::var(ENV_FORMAT) {
        Ok(value) => value.parse()?,
        Err(_) => config.format,
    };
    let output = match std::env::var(ENV_OUTPUT) {
        Ok(value) => value.parse()?,
        Err(_) => config.output,
    };

    let (writer, ansi) = match output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), config.color),
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), config.color),
        LogOutput::File => (BoxMakeWriter::new(Arc::new(open_log_file(&config.file)?)), false),
    };

    let registry = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ConfigError::Load(format!("Failed to install log subscriber: {e}")))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Load(format!("Failed to create log directory: {e}")))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ConfigError::Load(format!("Failed to open log file {}: {e}", path.display())))
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_FILTER) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut directives: Vec<String> = config
        .modules
        .iter()
        .map(|(module, level)| format!("{module}={level}"))
        .collect();
    if let Ok(modules) = std::env::var(ENV_MODULES) {
        directives.extend(parse_module_directives(&modules));
    }

    let mut filter = EnvFilter::new(&config.level);
    for directive in directives {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid log directive '{directive}': {e}")))?,
        );
    }
    Ok(filter)
}

/// `module=level` pairs separated by commas; malformed entries are skipped
fn parse_module_directives(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|entry| {
            let (module, level) = entry.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then(|| format!("{module}={level}"))
        })
        .collect()
}
