//! Configuration system for the Arbor agent runtime.
//!
//! Provides TOML-based configuration with:
//! - Named provider connections (`[providers.openai]`, `[providers.local]`, ...)
//! - Agent definitions with roles (`manager`, `agent`, `subagent`)
//! - Runtime limits that fall back to defaults key by key
//! - Config file layering (user config + project-local overrides)
//! - API key resolution (config value → named env var → provider default env var)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    load_explicit, log_dir, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{ResolvedSecret, SecretSource, resolve_api_key, resolve_api_key_with};
pub use types::*;
