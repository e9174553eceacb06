//! Project config file sources: street-trees.toml and config/{env}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;

const PROJECT_FILE: &str = "street-trees.toml";

/// Add project config files to builder.
/// Precedence: street-trees.toml (base) then config/{STREET_TREES_ENV}.toml (env-specific).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let env_name =
        std::env::var("STREET_TREES_ENV").unwrap_or_else(|_| "development".to_string());

    let mut builder = builder;

    let base_config_path = root.join(PROJECT_FILE);
    if base_config_path.exists() {
        builder = builder.add_source(File::from(base_config_path).required(false));
    }

    let env_config_path = root.join("config").join(format!("{env_name}.toml"));
    if env_config_path.exists() {
        builder = builder.add_source(File::from(env_config_path).required(false));
    }

    Ok(builder)
}
