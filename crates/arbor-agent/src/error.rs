//! Error types for the agent crate.

use arbor_hooks::HookFailure;
use thiserror::Error;

use crate::tool::ToolError;
use crate::validation::ValidationError;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Tool arguments or results failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Tool not found in registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool handler failed.
    #[error("Tool `{tool}` failed: {source}")]
    ToolFailed {
        tool: String,
        #[source]
        source: ToolError,
    },

    /// A hook listener failed, or a block aborted the operation.
    #[error(transparent)]
    Hook(#[from] HookFailure),

    /// The provider stream reported an error and the policy is to fail.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Agent not present in the catalog.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Prompt template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Task was cancelled.
    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    /// Create a tool failure for `tool`.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            source: ToolError::new(message),
        }
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Failures the turn loop absorbs into the transcript.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ToolFailed { .. } | Self::ToolNotFound(_))
    }

    /// The message shown to the model for a recoverable failure.
    pub fn failure_message(&self) -> String {
        match self {
            Self::ToolFailed { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}
