//! The subagent delegation tool.
//!
//! `spawn_subagent` is never executed through the registry: the orchestrator
//! intercepts the call, runs the child invocation and returns its final text.

use arbor_llm::ToolSpec;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::catalog::AgentRuntimeDescriptor;

pub const SPAWN_SUBAGENT_TOOL: &str = "spawn_subagent";

/// Schema id of the result a completed child produces.
pub const SUBAGENT_RESULT_SCHEMA: &str = "arbor://subagent/result";

/// Arguments of a `spawn_subagent` call.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnArgs {
    pub agent: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

pub(crate) fn spawn_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "agent": {
                "type": "string",
                "description": "Id of the subagent to run"
            },
            "prompt": {
                "type": "string",
                "description": "Task for the subagent"
            },
            "context": {
                "type": "string",
                "description": "Additional context from the current conversation to pass to the subagent"
            }
        },
        "required": ["agent", "prompt"],
        "additionalProperties": false
    })
}

fn format_available_agents(subagents: &[AgentRuntimeDescriptor]) -> String {
    if subagents.is_empty() {
        return "none configured".to_string();
    }
    subagents
        .iter()
        .map(|agent| match &agent.definition.description {
            Some(description) => format!("- {}: {}", agent.id, description),
            None => format!("- {}", agent.id),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tool definition offered to the model, listing the available subagents.
pub(crate) fn spawn_spec(subagents: &[AgentRuntimeDescriptor]) -> ToolSpec {
    ToolSpec {
        name: SPAWN_SUBAGENT_TOOL.to_string(),
        description: format!(
            "Delegate a task to a specialized subagent and wait for its answer. \
             Available subagents:\n{}",
            format_available_agents(subagents)
        ),
        parameters: spawn_parameters(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AgentDefinition;
    use arbor_llm::ScriptedAdapter;
    use std::sync::Arc;

    #[test]
    fn test_spec_lists_subagents() {
        let agent = AgentRuntimeDescriptor::new(
            AgentDefinition::new("researcher", "").with_description("Finds papers"),
            Arc::new(ScriptedAdapter::new(vec![])),
            "m",
        );
        let spec = spawn_spec(&[agent]);
        assert_eq!(spec.name, "spawn_subagent");
        assert!(spec.description.contains("- researcher: Finds papers"));
        assert!(spawn_spec(&[]).description.contains("none configured"));
    }

    #[test]
    fn test_args_deserialize() {
        let args: SpawnArgs =
            serde_json::from_value(json!({"agent": "a", "prompt": "p"})).unwrap();
        assert!(args.context.is_none());
    }
}
