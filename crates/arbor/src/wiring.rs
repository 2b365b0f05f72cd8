//! Builds adapters and the agent catalog from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use arbor_agent::{AgentDefinition, AgentRuntimeDescriptor, LoopConfig, StaticCatalog};
use arbor_config::{AgentConfig, AgentRole, ArborConfig, ProviderConfig, ProviderKind};
use arbor_llm::anthropic::DEFAULT_ANTHROPIC_BASE;
use arbor_llm::ollama::DEFAULT_OLLAMA_BASE;
use arbor_llm::openai::DEFAULT_OPENAI_BASE;
use arbor_llm::{
    AdapterConfig, AnthropicAdapter, OllamaAdapter, OpenAiAdapter, ResponsesAdapter, SharedAdapter,
};

fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Openai | ProviderKind::OpenaiResponses => DEFAULT_OPENAI_BASE,
        ProviderKind::Anthropic => DEFAULT_ANTHROPIC_BASE,
        ProviderKind::Ollama => DEFAULT_OLLAMA_BASE,
    }
}

/// Construct the adapter for one `[providers.*]` entry.
pub fn build_adapter(name: &str, provider: &ProviderConfig) -> Result<SharedAdapter> {
    let base_url = provider
        .base_url
        .as_deref()
        .unwrap_or_else(|| default_base_url(provider.kind));
    let mut config = AdapterConfig::new(name, base_url);
    if provider.kind == ProviderKind::Ollama {
        config = config.with_timeout(Duration::from_secs(600));
    }

    match arbor_config::resolve_api_key(provider) {
        Some(secret) => {
            tracing::debug!(provider = name, source = %secret.source, "Resolved API key");
            config = config.with_api_key(secret.value);
        }
        None if provider.kind.env_var().is_some() => {
            tracing::warn!(provider = name, kind = %provider.kind, "No API key found; requests will likely be rejected");
        }
        None => {}
    }
    if let Some(secs) = provider.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(max_tokens) = provider.max_tokens {
        config = config.with_max_tokens(max_tokens);
    }

    let adapter: SharedAdapter = match provider.kind {
        ProviderKind::Openai => Arc::new(OpenAiAdapter::new(config)?),
        ProviderKind::OpenaiResponses => Arc::new(ResponsesAdapter::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(config)?),
        ProviderKind::Ollama => Arc::new(OllamaAdapter::new(config)?),
    };
    Ok(adapter)
}

/// Translate one agent section into a definition.
pub fn definition(id: &str, agent: &AgentConfig) -> Result<AgentDefinition> {
    let mut definition = AgentDefinition::new(id, agent.system_prompt.clone());
    definition.description = agent.description.clone();
    definition.system_prompt_template = agent.system_prompt_template.clone();
    definition.user_prompt_template = agent.user_prompt_template.clone();
    definition.tools = agent.tools.clone();
    definition.model = agent.model.clone();
    definition.provider = agent.provider.clone();
    for (name, value) in &agent.variables {
        let value = serde_json::to_value(value)
            .with_context(|| format!("variable `{name}` of agent `{id}`"))?;
        definition.variables.insert(name.clone(), value);
    }
    Ok(definition)
}

/// Bind every configured agent to its adapter and model.
///
/// Adapters are shared between agents on the same provider.
pub fn build_catalog(config: &ArborConfig) -> Result<StaticCatalog> {
    let mut adapters: HashMap<String, SharedAdapter> = HashMap::new();
    let mut catalog =
        StaticCatalog::new().with_subagents_enabled(config.runtime.enable_subagents());

    for (id, agent) in &config.agents {
        let (provider_name, provider) = config.provider_for(id)?;
        let adapter = match adapters.get(provider_name) {
            Some(adapter) => adapter.clone(),
            None => {
                let adapter = build_adapter(provider_name, provider)?;
                adapters.insert(provider_name.to_string(), adapter.clone());
                adapter
            }
        };
        let descriptor =
            AgentRuntimeDescriptor::new(definition(id, agent)?, adapter, config.model_for(id)?);
        tracing::debug!(agent = %id, provider = provider_name, model = %descriptor.model, "Bound agent");

        catalog = match agent.role {
            AgentRole::Manager => catalog.with_manager(descriptor),
            AgentRole::Agent => catalog.with_agent(descriptor),
            AgentRole::Subagent => catalog.with_subagent(descriptor),
        };
    }
    Ok(catalog)
}

/// Loop limits from the `[runtime]` section.
pub fn loop_config(config: &ArborConfig) -> LoopConfig {
    LoopConfig::default()
        .with_max_iterations(config.runtime.max_iterations())
        .with_max_depth(config.runtime.max_depth())
        .with_stream_error_policy(config.runtime.stream_error_policy())
}
