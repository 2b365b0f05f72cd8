//! Agent definitions and the catalog that resolves them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use arbor_llm::SharedAdapter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Static description of an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    /// Overrides `system_prompt` when set. Supports `{{ name }}` placeholders.
    #[serde(default)]
    pub system_prompt_template: Option<String>,
    #[serde(default)]
    pub user_prompt_template: Option<String>,
    /// Tool whitelist. `None` exposes every registered tool.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_system_template(mut self, template: impl Into<String>) -> Self {
        self.system_prompt_template = Some(template.into());
        self
    }

    pub fn with_user_template(mut self, template: impl Into<String>) -> Self {
        self.user_prompt_template = Some(template.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Whether the whitelist admits `tool`.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools
            .as_ref()
            .is_none_or(|tools| tools.iter().any(|t| t == tool))
    }
}

/// A definition bound to the adapter and model it runs on.
#[derive(Clone)]
pub struct AgentRuntimeDescriptor {
    pub id: String,
    pub definition: Arc<AgentDefinition>,
    pub provider: SharedAdapter,
    pub model: String,
    /// Passed through to the provider on every call.
    pub metadata: Option<Map<String, Value>>,
}

impl fmt::Debug for AgentRuntimeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntimeDescriptor")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl AgentRuntimeDescriptor {
    pub fn new(definition: AgentDefinition, provider: SharedAdapter, model: impl Into<String>) -> Self {
        Self {
            id: definition.id.clone(),
            definition: Arc::new(definition),
            provider,
            model: model.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// Resolves agents by role.
pub trait Catalog: Send + Sync {
    /// The root agent of a session.
    fn manager(&self) -> Option<AgentRuntimeDescriptor>;

    /// Any top-level agent by id.
    fn agent(&self, id: &str) -> Option<AgentRuntimeDescriptor>;

    fn subagent(&self, id: &str) -> Option<AgentRuntimeDescriptor>;

    /// Every subagent, sorted by id.
    fn list_subagents(&self) -> Vec<AgentRuntimeDescriptor>;

    fn subagents_enabled(&self) -> bool;
}

pub type SharedCatalog = Arc<dyn Catalog>;

/// In-memory catalog built up front.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    manager: Option<String>,
    agents: HashMap<String, AgentRuntimeDescriptor>,
    subagents: BTreeMap<String, AgentRuntimeDescriptor>,
    enable_subagents: bool,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self {
            manager: None,
            agents: HashMap::new(),
            subagents: BTreeMap::new(),
            enable_subagents: true,
        }
    }
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the manager. It is also reachable through [`Catalog::agent`].
    pub fn with_manager(mut self, agent: AgentRuntimeDescriptor) -> Self {
        self.manager = Some(agent.id.clone());
        self.agents.insert(agent.id.clone(), agent);
        self
    }

    pub fn with_agent(mut self, agent: AgentRuntimeDescriptor) -> Self {
        self.agents.insert(agent.id.clone(), agent);
        self
    }

    pub fn with_subagent(mut self, agent: AgentRuntimeDescriptor) -> Self {
        self.subagents.insert(agent.id.clone(), agent);
        self
    }

    pub fn with_subagents_enabled(mut self, enabled: bool) -> Self {
        self.enable_subagents = enabled;
        self
    }
}

impl Catalog for StaticCatalog {
    fn manager(&self) -> Option<AgentRuntimeDescriptor> {
        self.manager.as_ref().and_then(|id| self.agents.get(id)).cloned()
    }

    fn agent(&self, id: &str) -> Option<AgentRuntimeDescriptor> {
        self.agents.get(id).cloned()
    }

    fn subagent(&self, id: &str) -> Option<AgentRuntimeDescriptor> {
        self.subagents.get(id).cloned()
    }

    fn list_subagents(&self) -> Vec<AgentRuntimeDescriptor> {
        self.subagents.values().cloned().collect()
    }

    fn subagents_enabled(&self) -> bool {
        self.enable_subagents
    }
}
