//! Configuration System
//!
//! Layered configuration for a persistence stack: built-in defaults, the user's config file,
//! the project's `street-trees.toml` and `config/{STREET_TREES_ENV}.toml`, then
//! `STREET_TREES__*` environment variables.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::store::{StoreLocation, StoreOptions};
use crate::trees::MODEL_NAME;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod merge;
mod sources;

pub use sources::user_file::user_config_path;

const ENV_PREFIX: &str = "STREET_TREES";
const STORE_EXTENSION: &str = "sqlite";

/// Everything needed to construct a persistence stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Name of the bundled object model
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Directory holding `<model_name>.model.toml`
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: PathBuf,

    /// Store location; defaults to `<documents>/<model_name>.sqlite`
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Use an ephemeral in-memory store
    #[serde(default)]
    pub in_memory: bool,

    #[serde(default)]
    pub store: StoreOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_model_name() -> String {
    MODEL_NAME.to_string()
}

fn default_bundle_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            bundle_dir: default_bundle_dir(),
            store_path: None,
            in_memory: false,
            store: StoreOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid("model_name cannot be empty".to_string()));
        }
        if self.in_memory && self.store_path.is_some() {
            return Err(ConfigError::Invalid(
                "store_path cannot be combined with in_memory".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the store lives
    pub fn resolved_store_location(&self) -> StoreLocation {
        if self.in_memory {
            return StoreLocation::InMemory;
        }
        let path = self.store_path.clone().unwrap_or_else(|| {
            documents_dir().join(format!("{}.{STORE_EXTENSION}", self.model_name))
        });
        StoreLocation::File(path)
    }
}

/// The user's documents directory, else the app data directory, else the working directory
pub fn documents_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(Path::to_path_buf))
        .or_else(|| {
            directories::ProjectDirs::from("org", "streettrees", "street-trees")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Loads `StackConfig` from layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a project rooted at `root`
    pub fn load(root: &Path) -> Result<StackConfig, ConfigError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::user_file::add_to_builder(builder)?;
        let builder = sources::project_file::add_to_builder(builder, root)?;
        let config = builder
            .add_source(environment())
            .build()?
            .try_deserialize::<StackConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from one explicit file, still honoring the environment
    pub fn load_from_file(path: &Path) -> Result<StackConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Load(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .add_source(environment())
            .build()?
            .try_deserialize::<StackConfig>()?;
        config.validate()?;
        Ok(config)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
