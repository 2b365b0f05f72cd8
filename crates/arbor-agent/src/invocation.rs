//! The invocation tree: one node per agent run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arbor_types::{ChatMessage, Role, ToolCallRecord, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::{AgentDefinition, AgentRuntimeDescriptor};
use crate::tool::ToolRegistry;

/// Identifier of one invocation: `<agent>-<8 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new(agent: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{agent}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Created,
    Running,
    Compacting,
    Completed,
    Failed,
}

/// Where a child sits in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub id: InvocationId,
    pub depth: usize,
}

/// One agent run: its transcript, its children and its counters.
pub struct AgentInvocation {
    id: InvocationId,
    descriptor: AgentRuntimeDescriptor,
    parent_id: Option<InvocationId>,
    depth: usize,
    tools: Arc<ToolRegistry>,
    context: String,
    variables: HashMap<String, Value>,
    pub(crate) messages: Vec<ChatMessage>,
    /// Index of the seeded prompt turn, after any history.
    pub(crate) prompt_index: Option<usize>,
    pub(crate) children: Vec<AgentInvocation>,
    pub(crate) state: InvocationState,
    pub(crate) iterations: u32,
    pub(crate) usage: Usage,
    pub(crate) truncated: bool,
    pub(crate) last_response_id: Option<String>,
}

impl fmt::Debug for AgentInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentInvocation")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("depth", &self.depth)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("messages", &self.messages.len())
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

impl AgentInvocation {
    pub(crate) fn new(
        descriptor: AgentRuntimeDescriptor,
        tools: Arc<ToolRegistry>,
        parent: Option<&ParentLink>,
        context: String,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: InvocationId::new(&descriptor.id),
            descriptor,
            parent_id: parent.map(|p| p.id.clone()),
            depth: parent.map_or(0, |p| p.depth + 1),
            tools,
            context,
            variables,
            messages: Vec::new(),
            prompt_index: None,
            children: Vec::new(),
            state: InvocationState::Created,
            iterations: 0,
            usage: Usage::default(),
            truncated: false,
            last_response_id: None,
        }
    }

    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.descriptor.definition
    }

    pub fn descriptor(&self) -> &AgentRuntimeDescriptor {
        &self.descriptor
    }

    pub fn parent_id(&self) -> Option<&InvocationId> {
        self.parent_id.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The link a child of this invocation carries.
    pub fn link(&self) -> ParentLink {
        ParentLink {
            id: self.id.clone(),
            depth: self.depth,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Position of the prompt message once the transcript is seeded.
    pub fn prompt_index(&self) -> Option<usize> {
        self.prompt_index
    }

    pub fn children(&self) -> &[AgentInvocation] {
        &self.children
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Whether the iteration cap ended the run.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }

    /// Content of the last assistant message with text.
    pub fn final_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant() && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }

    /// Find an invocation in this subtree.
    pub fn find(&self, id: &InvocationId) -> Option<&AgentInvocation> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Append streamed text to the assistant message of the current turn,
    /// opening one when the transcript does not end with an assistant.
    pub(crate) fn append_assistant(&mut self, text: &str, reasoning: bool, turn: &mut Option<usize>) {
        let index = match self.messages.last() {
            Some(last) if last.role == Role::Assistant => {
                let index = self.messages.len() - 1;
                *turn = Some(index);
                index
            }
            _ => self.open_assistant(turn),
        };
        let message = &mut self.messages[index];
        if reasoning {
            message.reasoning.get_or_insert_with(String::new).push_str(text);
        } else {
            message.content.push_str(text);
        }
    }

    /// Attach a call to the assistant message of the current turn.
    pub(crate) fn record_tool_call(&mut self, call: ToolCallRecord, turn: &mut Option<usize>) {
        let index = match *turn {
            Some(index) => index,
            None => self.open_assistant(turn),
        };
        self.messages[index].tool_calls.push(call);
    }

    fn open_assistant(&mut self, turn: &mut Option<usize>) -> usize {
        self.messages.push(ChatMessage::assistant(""));
        let index = self.messages.len() - 1;
        *turn = Some(index);
        index
    }
}

/// Every invocation in the tree, pre-order.
pub fn collect_invocations(root: &AgentInvocation) -> Vec<&AgentInvocation> {
    let mut out = vec![root];
    for child in &root.children {
        out.extend(collect_invocations(child));
    }
    out
}
