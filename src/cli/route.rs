//! CLI route: single route table and run context. Dispatches to the tree data service and
//! presentation.

use crate::cli::parse::{Commands, ListFormat};
use crate::cli::presentation::{format_trees_json, format_trees_table};
use crate::config::{ConfigLoader, StackConfig};
use crate::stack::PersistenceStack;
use crate::trees::{Tree, TreeDataService};
use anyhow::Context as _;
use std::path::PathBuf;
use tracing::info;

/// Runtime context for CLI execution: the loaded configuration.
pub struct RunContext {
    config: StackConfig,
}

impl RunContext {
    /// Load configuration from `config_path`, else from the project at `root`.
    pub fn new(
        root: PathBuf,
        config_path: Option<PathBuf>,
        in_memory: bool,
    ) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => ConfigLoader::load_from_file(&path)?,
            None => ConfigLoader::load(&root)?,
        };
        if in_memory {
            config.in_memory = true;
            config.store_path = None;
        }
        Ok(Self { config })
    }

    pub fn from_config(config: StackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    async fn open_service(&self) -> anyhow::Result<TreeDataService> {
        let stack = PersistenceStack::open(&self.config).await.with_context(|| {
            format!(
                "opening store at {}",
                self.config.resolved_store_location().display_path().display()
            )
        })?;
        Ok(TreeDataService::new(stack))
    }

    pub async fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Init => {
                let service = self.open_service().await?;
                let location = service.stack().store_location().display_path();
                Ok(format!("Store ready at {}", location.display()))
            }
            Commands::Import { file } => {
                let contents = std::fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let trees: Vec<Tree> = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing trees from {}", file.display()))?;
                let service = self.open_service().await?;
                let count = service.import_trees(trees)?;
                info!(count, file = %file.display(), "import finished");
                Ok(format!("Imported {count} tree(s)"))
            }
            Commands::List { species, format } => {
                let service = self.open_service().await?;
                let trees = match species {
                    Some(species) => service.trees_of_species(species)?,
                    None => service.trees()?,
                };
                match format {
                    ListFormat::Text => Ok(format_trees_table(&trees)),
                    ListFormat::Json => Ok(format_trees_json(&trees)?),
                }
            }
            Commands::Reset => {
                let service = self.open_service().await?;
                service.reset().await?;
                Ok("Store reset".to_string())
            }
        }
    }
}
