//! CLI command handlers.

pub mod agents;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use arbor_config::{ArborConfig, LoadedConfig};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file; discovery runs when unset.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    pub verbose: bool,
}

impl Context {
    /// Load the configuration, logging any load warnings.
    pub fn load_config(&self) -> Result<ArborConfig> {
        let loaded: LoadedConfig = match &self.config_path {
            Some(path) => arbor_config::load_explicit(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => arbor_config::load_config(None)?,
        };
        for warning in &loaded.warnings {
            tracing::warn!("{}", warning);
        }
        for path in loaded.loaded_from() {
            tracing::debug!(path = %path.display(), "Loaded config layer");
        }
        Ok(loaded.config)
    }
}
