//! User config file source: the platform config directory's street-trees/config.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::PathBuf;
use tracing::debug;

/// Path to the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "streettrees", "street-trees")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the user config file source to builder if it exists.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if let Some(path) = user_config_path() {
        if path.exists() {
            builder = builder.add_source(File::from(path).required(false));
        } else {
            debug!(config_path = %path.display(), "no user configuration file");
        }
    }
    Ok(builder)
}
