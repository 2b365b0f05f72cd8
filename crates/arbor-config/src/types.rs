//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [runtime]                 # loop limits, tracing, default provider
//! [providers.openai]        # named provider connections
//! [agents.manager]          # agent definitions
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use arbor_types::StreamErrorPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default cap on model calls per invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Default cap on subagent nesting.
pub const DEFAULT_MAX_DEPTH: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Every section is optional so partial configs (project-local overrides)
/// can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    pub runtime: RuntimeConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub agents: BTreeMap<String, AgentConfig>,
}

impl ArborConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Runtime keys override one by one; providers and agents are replaced
    /// whole, by name.
    pub fn merge(&mut self, other: ArborConfig) {
        self.runtime.merge(other.runtime);
        self.providers.extend(other.providers);
        self.agents.extend(other.agents);
    }

    /// The agent declaring the manager role, if any.
    pub fn manager(&self) -> Option<(&str, &AgentConfig)> {
        self.agents
            .iter()
            .find(|(_, agent)| agent.role == AgentRole::Manager)
            .map(|(id, agent)| (id.as_str(), agent))
    }

    /// Agents declaring the subagent role.
    pub fn subagents(&self) -> impl Iterator<Item = (&str, &AgentConfig)> {
        self.agents
            .iter()
            .filter(|(_, agent)| agent.role == AgentRole::Subagent)
            .map(|(id, agent)| (id.as_str(), agent))
    }

    /// Resolve the provider an agent runs on.
    ///
    /// Order: the agent's own `provider`, then `runtime.default_provider`,
    /// then the only configured provider when there is exactly one.
    pub fn provider_for(&self, agent_id: &str) -> Result<(&str, &ProviderConfig)> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| ConfigError::AgentNotFound(agent_id.to_string()))?;

        let (name, context) = match (&agent.provider, &self.runtime.default_provider) {
            (Some(name), _) => (name.as_str(), format!("agents.{agent_id}.provider")),
            (None, Some(name)) => (name.as_str(), "runtime.default_provider".to_string()),
            (None, None) => {
                let mut providers = self.providers.iter();
                return match (providers.next(), providers.next()) {
                    (Some((name, provider)), None) => Ok((name.as_str(), provider)),
                    _ => Err(ConfigError::NoDefaultProvider {
                        agent: agent_id.to_string(),
                    }),
                };
            }
        };
        self.providers
            .get_key_value(name)
            .map(|(name, provider)| (name.as_str(), provider))
            .ok_or_else(|| ConfigError::ProviderNotFound {
                name: name.to_string(),
                context,
            })
    }

    /// Resolve the model an agent runs: the agent's, then its provider's.
    pub fn model_for(&self, agent_id: &str) -> Result<String> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| ConfigError::AgentNotFound(agent_id.to_string()))?;
        if let Some(model) = &agent.model {
            return Ok(model.clone());
        }
        let (_, provider) = self.provider_for(agent_id)?;
        provider.model.clone().ok_or_else(|| ConfigError::NoModel {
            agent: agent_id.to_string(),
        })
    }

    /// Check cross-references: one manager at most, every agent has a
    /// system prompt and a resolvable provider.
    pub fn validate(&self) -> Result<()> {
        let managers: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, agent)| agent.role == AgentRole::Manager)
            .map(|(id, _)| id.clone())
            .collect();
        if managers.len() > 1 {
            return Err(ConfigError::MultipleManagers(managers));
        }

        if let Some(name) = &self.runtime.default_provider
            && !self.providers.contains_key(name)
        {
            return Err(ConfigError::ProviderNotFound {
                name: name.clone(),
                context: "runtime.default_provider".to_string(),
            });
        }

        for (id, agent) in &self.agents {
            if agent.system_prompt.trim().is_empty() && agent.system_prompt_template.is_none() {
                return Err(ConfigError::MissingField {
                    field: "system_prompt".to_string(),
                    context: format!("agents.{id}"),
                });
            }
            self.provider_for(id)?;
        }
        Ok(())
    }

    /// Providers carrying an API key in plain text.
    pub fn plaintext_key_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.api_key.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Loop limits and runtime switches. Unset keys fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider used by agents that do not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_subagents: Option<bool>,
    /// JSONL trace destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_append: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_error_policy: Option<StreamErrorPolicy>,
}

impl RuntimeConfig {
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    pub fn enable_subagents(&self) -> bool {
        self.enable_subagents.unwrap_or(true)
    }

    pub fn trace_append(&self) -> bool {
        self.trace_append.unwrap_or(false)
    }

    pub fn stream_error_policy(&self) -> StreamErrorPolicy {
        self.stream_error_policy.unwrap_or_default()
    }

    fn merge(&mut self, other: RuntimeConfig) {
        if other.default_provider.is_some() {
            self.default_provider = other.default_provider;
        }
        if other.max_iterations.is_some() {
            self.max_iterations = other.max_iterations;
        }
        if other.max_depth.is_some() {
            self.max_depth = other.max_depth;
        }
        if other.enable_subagents.is_some() {
            self.enable_subagents = other.enable_subagents;
        }
        if other.trace_path.is_some() {
            self.trace_path = other.trace_path;
        }
        if other.trace_append.is_some() {
            self.trace_append = other.trace_append;
        }
        if other.stream_error_policy.is_some() {
            self.stream_error_policy = other.stream_error_policy;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions.
    Openai,
    /// OpenAI Responses API.
    OpenaiResponses,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    /// Environment variable consulted when no key is configured.
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Openai | ProviderKind::OpenaiResponses => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "OpenAI",
            ProviderKind::OpenaiResponses => "OpenAI Responses",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Ollama => "Ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A named provider connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Overrides the kind's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Plain-text key. Prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Model used by agents that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key: None,
            api_key_env: None,
            model: None,
            timeout_secs: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────────────────

/// Where an agent sits in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Manager,
    #[default]
    Agent,
    Subagent,
}

/// One agent definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub role: AgentRole,
    /// Shown to the manager in the subagent listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt_template: Option<String>,
    /// Allow-list of tool names. All tools when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Name of a `[providers.*]` entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Template variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, toml::Value>,
}

impl AgentConfig {
    pub fn new(role: AgentRole, system_prompt: impl Into<String>) -> Self {
        Self {
            role,
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[runtime]
default_provider = "openai"
max_depth = 2
stream_error_policy = "end_iteration"

[providers.openai]
kind = "openai"
model = "gpt-4o-mini"

[providers.local]
kind = "ollama"
base_url = "http://gpu-box:11434"
model = "llama3.1"

[agents.lead]
role = "manager"
system_prompt = "You coordinate the team."

[agents.writer]
role = "subagent"
description = "Drafts prose"
system_prompt = "You write."
provider = "local"
tools = ["read_file"]

[agents.writer.variables]
tone = "dry"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ArborConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers["local"].kind, ProviderKind::Ollama);
        assert_eq!(config.agents["writer"].role, AgentRole::Subagent);
        assert_eq!(
            config.agents["writer"].tools.as_deref(),
            Some(&["read_file".to_string()][..])
        );
        assert_eq!(
            config.agents["writer"].variables["tone"],
            toml::Value::String("dry".to_string())
        );
        assert_eq!(config.runtime.max_depth(), 2);
        assert_eq!(config.runtime.stream_error_policy(), StreamErrorPolicy::EndIteration);
        config.validate().unwrap();
    }

    #[test]
    fn test_runtime_defaults() {
        let runtime = RuntimeConfig::default();
        assert_eq!(runtime.max_iterations(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(runtime.max_depth(), DEFAULT_MAX_DEPTH);
        assert!(runtime.enable_subagents());
        assert!(!runtime.trace_append());
        assert_eq!(runtime.stream_error_policy(), StreamErrorPolicy::Continue);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ArborConfig::from_toml("").unwrap();
        assert_eq!(config, ArborConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_manager_and_subagents() {
        let config = ArborConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.manager().map(|(id, _)| id), Some("lead"));
        let subagents: Vec<&str> = config.subagents().map(|(id, _)| id).collect();
        assert_eq!(subagents, vec!["writer"]);
    }

    #[test]
    fn test_provider_resolution() {
        let config = ArborConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.provider_for("writer").unwrap().0, "local");
        assert_eq!(config.provider_for("lead").unwrap().0, "openai");
        assert_eq!(config.model_for("lead").unwrap(), "gpt-4o-mini");
        assert_eq!(config.model_for("writer").unwrap(), "llama3.1");
    }

    #[test]
    fn test_single_provider_is_implicit_default() {
        let mut config = ArborConfig::new();
        config
            .providers
            .insert("only".to_string(), ProviderConfig::new(ProviderKind::Anthropic));
        config
            .agents
            .insert("a".to_string(), AgentConfig::new(AgentRole::Agent, "hi"));
        assert_eq!(config.provider_for("a").unwrap().0, "only");
        assert!(matches!(
            config.model_for("a").unwrap_err(),
            ConfigError::NoModel { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = ArborConfig::from_toml(SAMPLE).unwrap();
        config.agents.get_mut("writer").unwrap().provider = Some("missing".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ProviderNotFound { ref name, .. } if name == "missing"));
        assert!(err.to_string().contains("agents.writer.provider"));
    }

    #[test]
    fn test_validate_rejects_two_managers() {
        let mut config = ArborConfig::from_toml(SAMPLE).unwrap();
        config
            .agents
            .insert("other".to_string(), AgentConfig::new(AgentRole::Manager, "me too"));
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MultipleManagers(ids) if ids == vec!["lead", "other"]
        ));
    }

    #[test]
    fn test_validate_requires_system_prompt() {
        let mut config = ArborConfig::from_toml(SAMPLE).unwrap();
        config.agents.get_mut("lead").unwrap().system_prompt = "  ".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingField { ref field, .. } if field == "system_prompt"
        ));
    }

    #[test]
    fn test_no_provider_without_default() {
        let mut config = ArborConfig::from_toml(SAMPLE).unwrap();
        config.runtime.default_provider = None;
        assert!(matches!(
            config.provider_for("lead").unwrap_err(),
            ConfigError::NoDefaultProvider { .. }
        ));
    }

    #[test]
    fn test_merge_overrides_runtime_keys_individually() {
        let mut base = ArborConfig::from_toml(SAMPLE).unwrap();
        let overlay = ArborConfig::from_toml(
            r#"
[runtime]
max_iterations = 5

[agents.lead]
role = "manager"
system_prompt = "Project-specific lead."
"#,
        )
        .unwrap();
        base.merge(overlay);

        assert_eq!(base.runtime.max_iterations(), 5);
        assert_eq!(base.runtime.max_depth(), 2);
        assert_eq!(base.runtime.default_provider.as_deref(), Some("openai"));
        assert_eq!(base.agents["lead"].system_prompt, "Project-specific lead.");
        assert!(base.agents.contains_key("writer"));
    }

    #[test]
    fn test_plaintext_key_providers() {
        let mut config = ArborConfig::from_toml(SAMPLE).unwrap();
        assert!(config.plaintext_key_providers().is_empty());
        config.providers.get_mut("openai").unwrap().api_key = Some("sk-test".to_string());
        assert_eq!(config.plaintext_key_providers(), vec!["openai"]);
    }
}
