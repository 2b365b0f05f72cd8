//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Referenced provider not configured.
    #[error("provider '{name}' not found (referenced by {context})")]
    ProviderNotFound { name: String, context: String },

    /// An agent has no provider and no default could be chosen.
    #[error("no provider for agent '{agent}': set `provider` on the agent or `runtime.default_provider`")]
    NoDefaultProvider { agent: String },

    /// No model for an agent through any resolution step.
    #[error("no model for agent '{agent}': set `model` on the agent or its provider")]
    NoModel { agent: String },

    /// More than one agent declares the manager role.
    #[error("at most one manager agent is allowed, found: {}", .0.join(", "))]
    MultipleManagers(Vec<String>),

    /// Referenced agent not configured.
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },
}
