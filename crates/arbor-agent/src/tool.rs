//! Tool framework for agent capabilities.
//!
//! This module defines the [`Tool`] trait that all agent tools implement and
//! the [`ToolRegistry`] that validates and executes them.
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_agent::{Tool, ToolContext, ToolError, ToolRegistry};
//!
//! struct MyTool;
//!
//! #[async_trait]
//! impl Tool for MyTool {
//!     fn name(&self) -> &str { "my_tool" }
//!     fn description(&self) -> &str { "Does something useful" }
//!     fn parameters(&self) -> Value { json!({"type": "object"}) }
//!
//!     async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
//!         Ok(ToolResult::text("Done!"))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(MyTool)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use arbor_llm::ToolSpec;
use arbor_types::ToolResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::validation::{CompiledSchema, IssueKind, SchemaIssue, ValidationError};

// ─────────────────────────────────────────────────────────────────────────────
// Errors and confirmation
// ─────────────────────────────────────────────────────────────────────────────

/// A failure raised by a tool handler. The turn loop reports it to the model
/// and keeps going.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Asks the user before a tool does something consequential.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Answers every confirmation with a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, message: &str) -> bool {
        tracing::debug!(message, approved = self.0, "Auto-confirm");
        self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context provided to tool execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Working directory for relative paths.
    pub cwd: PathBuf,
    /// Extra environment for spawned processes.
    pub env: HashMap<String, String>,
    pub confirm: Arc<dyn Confirm>,
    /// Invocation that issued the call.
    pub agent_id: String,
    pub tool_call_id: Option<String>,
    pub cancellation: CancellationToken,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("cwd", &self.cwd)
            .field("agent_id", &self.agent_id)
            .field("tool_call_id", &self.tool_call_id)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    /// A context rooted at `cwd` that declines every confirmation.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
            confirm: Arc::new(AutoConfirm(false)),
            agent_id: String::new(),
            tool_call_id: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attribute the context to one call.
    pub fn for_call(mut self, agent_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn confirm(&self, message: &str) -> bool {
        self.confirm.confirm(message).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for agent tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, as the model calls it.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments.
    fn parameters(&self) -> Value;

    /// JSON Schema for `ToolResult::data`. When present, results must carry
    /// this schema's `$id` (or `arbor://tools/<name>/output` if it has none).
    fn output_schema(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError>;
}

type Handler =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, std::result::Result<ToolResult, ToolError>> + Send + Sync>;

/// A tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    output_schema: Option<Value>,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, parameters: Value, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            parameters,
            output_schema: None,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx)) as BoxFuture<'static, _>),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn output_schema(&self) -> Option<Value> {
        self.output_schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
        (self.handler)(args, ctx.clone()).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize raw model arguments into an object. JSON strings are parsed;
/// anything that is not an object ends up under `input`.
pub fn coerce_arguments(raw: Value) -> Value {
    match raw {
        Value::Object(_) => raw,
        Value::Null => json!({}),
        Value::String(text) => {
            if text.trim().is_empty() {
                return json!({});
            }
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed @ Value::Object(_)) => parsed,
                Ok(Value::Null) => json!({}),
                _ => json!({ "input": text }),
            }
        }
        other => json!({ "input": other }),
    }
}

/// The `$id` given to output schemas that do not declare one.
pub fn synthesized_output_id(tool: &str) -> String {
    format!("arbor://tools/{tool}/output")
}

// Every result must have a non-empty schema id and a content string.
static ENVELOPE: LazyLock<std::result::Result<CompiledSchema, ValidationError>> = LazyLock::new(|| {
    CompiledSchema::compile(&json!({
        "type": "object",
        "properties": {
            "schema": { "type": "string", "minLength": 1 },
            "content": { "type": "string" },
            "metadata": { "type": ["object", "null"] }
        },
        "required": ["schema", "content"]
    }))
});

fn envelope() -> std::result::Result<&'static CompiledSchema, ValidationError> {
    ENVELOPE.as_ref().map_err(Clone::clone)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct OutputContract {
    id: String,
    data: Arc<CompiledSchema>,
}

#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    arguments: Arc<CompiledSchema>,
    output: Option<OutputContract>,
}

/// Registry of available tools with their compiled schemas.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Compiled output schemas keyed by `$id`.
    validators: HashMap<String, Arc<CompiledSchema>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schemas. A tool with the same name is
    /// replaced.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let arguments = CompiledSchema::compile(&tool.parameters()).map_err(|e| {
            ValidationError::new(format!("Tool `{name}` has an invalid argument schema: {e}"))
        })?;
        let output = match tool.output_schema() {
            Some(schema) => Some(self.output_contract(&name, schema)?),
            None => None,
        };

        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Replacing registered tool");
        }
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                arguments: Arc::new(arguments),
                output,
            },
        );
        Ok(())
    }

    fn output_contract(&mut self, name: &str, mut schema: Value) -> Result<OutputContract> {
        let id = schema
            .get("$id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesized_output_id(name));

        if let Some(data) = self.validators.get(&id) {
            return Ok(OutputContract {
                id,
                data: data.clone(),
            });
        }

        if let Some(body) = schema.as_object_mut() {
            body.remove("$id");
        }
        let data = Arc::new(CompiledSchema::compile(&schema).map_err(|e| {
            ValidationError::new(format!("Tool `{name}` has an invalid output schema: {e}"))
        })?);
        self.validators.insert(id.clone(), data.clone());
        Ok(OutputContract { id, data })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// The schema id results of `name` must carry, if it declares one.
    pub fn output_schema_id(&self, name: &str) -> Option<&str> {
        self.tools
            .get(name)
            .and_then(|entry| entry.output.as_ref())
            .map(|contract| contract.id.as_str())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Specs offered to the model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|entry| ToolSpec {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.tool.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// A registry holding only the named tools. Unknown names are skipped.
    pub fn filtered_by_names(&self, names: &[String]) -> ToolRegistry {
        let mut filtered = ToolRegistry {
            tools: HashMap::new(),
            validators: self.validators.clone(),
        };
        for name in names {
            match self.tools.get(name) {
                Some(entry) => {
                    filtered.tools.insert(name.clone(), entry.clone());
                }
                None => tracing::debug!(tool = %name, "Tool not in registry; skipping"),
            }
        }
        filtered
    }

    /// Validate arguments, run the tool, then validate what it returned.
    ///
    /// Unknown tools and handler failures come back as recoverable errors;
    /// schema violations are [`AgentError::Validation`].
    pub async fn execute(&self, name: &str, arguments: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let arguments = coerce_arguments(arguments);
        let issues = entry.arguments.validate(&arguments);
        if !issues.is_empty() {
            return Err(ValidationError::arguments(name, issues).into());
        }

        tracing::debug!(tool = %name, agent_id = %ctx.agent_id, "Executing tool");
        let result = entry
            .tool
            .execute(arguments, ctx)
            .await
            .map_err(|source| AgentError::ToolFailed {
                tool: name.to_string(),
                source,
            })?;

        check_result(name, entry, &result)?;
        Ok(result)
    }
}

fn check_result(name: &str, entry: &RegisteredTool, result: &ToolResult) -> Result<()> {
    let issues = envelope()?.validate(&serde_json::to_value(result)?);
    if !issues.is_empty() {
        return Err(ValidationError::result(name, "result", issues).into());
    }

    let Some(contract) = &entry.output else {
        return Ok(());
    };
    if result.schema != contract.id {
        return Err(ValidationError::result(
            name,
            "result",
            vec![SchemaIssue::new(
                vec!["schema".to_string()],
                IssueKind::Enum {
                    options: vec![Value::String(contract.id.clone())],
                },
            )],
        )
        .into());
    }
    let Some(data) = &result.data else {
        return Err(ValidationError::result(
            name,
            "result",
            vec![SchemaIssue::new(
                vec![],
                IssueKind::Required {
                    property: "data".to_string(),
                },
            )],
        )
        .into());
    };
    let issues = contract.data.validate(data);
    if !issues.is_empty() {
        return Err(ValidationError::result(name, "data", issues).into());
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// A mock tool that records its calls.
#[cfg(test)]
pub struct MockTool {
    name: String,
    parameters: Value,
    response: std::sync::Mutex<Option<ToolResult>>,
    calls: std::sync::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: json!({ "type": "object", "properties": {} }),
            response: std::sync::Mutex::new(None),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_response(self, response: ToolResult) -> Self {
        *self.response.lock().unwrap() = Some(response);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A mock tool for testing"
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
        self.calls.lock().unwrap().push(args);
        Ok(self
            .response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ToolResult::text("mock response")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
