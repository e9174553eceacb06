//! Merge rules: defaults beneath every file and environment source.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the stack defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("model_name", crate::trees::MODEL_NAME)?
        .set_default("bundle_dir", "models")?
        .set_default("in_memory", false)?
        .set_default("store.automatic_migration", true)?
        .set_default("store.infer_mapping", true)?
        .set_default("store.journal", "write_ahead_log")
}
