//! The orchestrator drives invocations through the turn loop.
//!
//! ```text
//! beforeAgentStart ─► seed transcript ─┐
//!                                      ▼
//!        ┌──── beforeModelCall ─► stream ─► tool calls ─► compaction ◄─┐
//!        │                                    │ (any)                  │
//!        │                                    └────────────────────────┘
//!        ▼ (none)
//!      stop ─► continue? ─yes─► next iteration
//!        │no
//!        ▼
//!  afterAgentComplete
//! ```
//!
//! Every stream event is forwarded to the renderer tagged with the
//! invocation id, so one renderer sees the whole tree. Subagent calls
//! recurse through the same loop and are awaited before the parent's next
//! stream event is read.

use std::collections::HashMap;
use std::error::Error as _;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use arbor_hooks::event::{
    AfterAgentComplete, BeforeAgentStart, BeforeContextPack, BeforeModelCall, BeforeSpawnSubagent,
    Notification, OnAgentError, PostToolUse, PreCompact, PreToolUse, SessionEnd, SessionStart, Stop,
    StreamError, SubagentStop,
};
use arbor_hooks::{AgentRunner, HookBus, HookError, HookPayload, SharedHookBus};
use arbor_llm::{StreamOptions, ToolSpec};
use arbor_types::{
    AgentEvent, ChatMessage, StreamErrorPolicy, StreamEvent, ToolCallEvent, ToolCallRecord, ToolResult,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::{AgentRuntimeDescriptor, SharedCatalog};
use crate::compaction::TranscriptCompactor;
use crate::error::{AgentError, Result};
use crate::invocation::{AgentInvocation, InvocationState, ParentLink};
use crate::prompt::{DefaultTemplateRenderer, PromptContext, TemplateRenderer};
use crate::render::{NullRenderer, StreamRenderer};
use crate::tool::{AutoConfirm, Confirm, ToolContext, ToolRegistry, coerce_arguments};
use crate::tools::{SPAWN_SUBAGENT_TOOL, SUBAGENT_RESULT_SCHEMA, SpawnArgs, spawn_parameters, spawn_spec};
use crate::trace::{JsonlTraceSink, TracePhase, TraceSink, Tracer};
use crate::validation::{CompiledSchema, ValidationError};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default cap on model calls per invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Default cap on subagent nesting.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Limits and policies of the turn loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Deepest allowed child; the root is depth 0.
    pub max_depth: usize,
    pub stream_error_policy: StreamErrorPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_depth: DEFAULT_MAX_DEPTH,
            stream_error_policy: StreamErrorPolicy::default(),
        }
    }
}

impl LoopConfig {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }

    pub fn with_stream_error_policy(mut self, policy: StreamErrorPolicy) -> Self {
        self.stream_error_policy = policy;
        self
    }
}

/// Everything the orchestrator needs, built once per process.
pub struct RuntimeOptions {
    pub catalog: SharedCatalog,
    pub hooks: SharedHookBus,
    pub tools: Arc<ToolRegistry>,
    pub confirm: Arc<dyn Confirm>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub trace_path: Option<PathBuf>,
    pub trace_append: bool,
    pub trace_sink: Arc<dyn TraceSink>,
    pub compactor: Option<Arc<dyn TranscriptCompactor>>,
    pub renderer: Arc<dyn StreamRenderer>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub config: LoopConfig,
    pub cancellation: CancellationToken,
}

impl RuntimeOptions {
    pub fn new(catalog: SharedCatalog, cwd: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            hooks: Arc::new(HookBus::new()),
            tools: Arc::new(ToolRegistry::new()),
            confirm: Arc::new(AutoConfirm(false)),
            cwd: cwd.into(),
            env: HashMap::new(),
            trace_path: None,
            trace_append: false,
            trace_sink: Arc::new(JsonlTraceSink),
            compactor: None,
            renderer: Arc::new(NullRenderer),
            templates: Arc::new(DefaultTemplateRenderer),
            config: LoopConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: SharedHookBus) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Write a JSONL trace to `path`. With `append` false the file is
    /// truncated by the first record of each run.
    pub fn with_trace(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.trace_path = Some(path.into());
        self.trace_append = append;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn TranscriptCompactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn StreamRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A top-level (or explicitly parented) run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub agent: AgentRuntimeDescriptor,
    pub prompt: String,
    pub context: String,
    /// Messages placed between the system prompt and the user prompt.
    pub history: Vec<ChatMessage>,
    pub variables: HashMap<String, Value>,
    pub parent: Option<ParentLink>,
}

impl RunRequest {
    pub fn new(agent: AgentRuntimeDescriptor, prompt: impl Into<String>) -> Self {
        Self {
            agent,
            prompt: prompt.into(),
            context: String::new(),
            history: Vec::new(),
            variables: HashMap::new(),
            parent: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A child run under an existing invocation.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub agent: AgentRuntimeDescriptor,
    pub prompt: String,
    pub context: String,
    pub variables: HashMap<String, Value>,
}

impl SpawnRequest {
    pub fn new(agent: AgentRuntimeDescriptor, prompt: impl Into<String>) -> Self {
        Self {
            agent,
            prompt: prompt.into(),
            context: String::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// A finished session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    pub root: AgentInvocation,
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    options: RuntimeOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cwd", &self.options.cwd)
            .field("tools", &self.options.tools)
            .field("config", &self.options.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn hooks(&self) -> &SharedHookBus {
        &self.options.hooks
    }

    /// Register this orchestrator as the hook bus's agent runner, so
    /// listeners can delegate sub-runs. Returns false if a runner exists.
    pub fn install_agent_runner(self: &Arc<Self>) -> bool {
        self.options
            .hooks
            .set_agent_runner(Arc::new(OrchestratorRunner(Arc::downgrade(self))))
    }

    /// Run one agent to completion.
    pub async fn run_agent(&self, request: RunRequest) -> Result<AgentInvocation> {
        let tracer = self.tracer(self.options.trace_append);
        self.run_traced(request, &tracer).await
    }

    async fn run_traced(&self, request: RunRequest, tracer: &Tracer) -> Result<AgentInvocation> {
        let tools = self.registry_for(&request.agent);
        let mut invocation = AgentInvocation::new(
            request.agent,
            tools,
            request.parent.as_ref(),
            request.context,
            request.variables,
        );
        self.drive(&mut invocation, tracer, &request.prompt, request.history)
            .await?;
        Ok(invocation)
    }

    /// Run `request` as a session, bracketed by the session hooks.
    pub async fn run_session(&self, request: RunRequest) -> Result<SessionOutcome> {
        let session_id = Uuid::new_v4().to_string();
        let hooks = &self.options.hooks;
        tracing::info!(session_id = %session_id, agent = %request.agent.id, "Session started");

        hooks
            .emit_checked(HookPayload::SessionStart(SessionStart {
                session_id: session_id.clone(),
                cwd: self.options.cwd.clone(),
            }))
            .await?;
        hooks
            .emit_checked(HookPayload::BeforeContextPack(BeforeContextPack {
                session_id: session_id.clone(),
                agent: request.agent.id.clone(),
                cwd: self.options.cwd.clone(),
                context_bytes: request.context.len(),
            }))
            .await?;

        let result = self.run_agent(request).await;
        hooks
            .emit(HookPayload::SessionEnd(SessionEnd {
                session_id: session_id.clone(),
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            }))
            .await;
        tracing::info!(session_id = %session_id, success = result.is_ok(), "Session ended");

        result.map(|root| SessionOutcome { session_id, root })
    }

    /// Run a child under `parent` and return it once it completes.
    pub async fn spawn<'p>(
        &self,
        parent: &'p mut AgentInvocation,
        request: SpawnRequest,
    ) -> Result<&'p AgentInvocation> {
        let tracer = self.tracer(true);
        let index = self.spawn_child(parent, &tracer, request).await?;
        Ok(&parent.children[index])
    }

    fn tracer(&self, append_first: bool) -> Tracer {
        Tracer::new(
            self.options.trace_sink.clone(),
            self.options.trace_path.clone(),
            append_first,
        )
    }

    fn registry_for(&self, agent: &AgentRuntimeDescriptor) -> Arc<ToolRegistry> {
        match &agent.definition.tools {
            Some(names) => Arc::new(self.options.tools.filtered_by_names(names)),
            None => self.options.tools.clone(),
        }
    }

    fn delegation_enabled(&self, invocation: &AgentInvocation) -> bool {
        let catalog = &self.options.catalog;
        catalog.subagents_enabled()
            && invocation.definition().allows_tool(SPAWN_SUBAGENT_TOOL)
            && !catalog.list_subagents().is_empty()
    }

    fn tool_specs(&self, invocation: &AgentInvocation) -> Vec<ToolSpec> {
        let mut specs = invocation.tools().specs();
        if self.delegation_enabled(invocation) {
            specs.push(spawn_spec(&self.options.catalog.list_subagents()));
        }
        specs
    }

    // ── Invocation lifecycle ─────────────────────────────────────────────

    /// Run the loop, reporting failures through `onAgentError`.
    fn drive<'a>(
        &'a self,
        invocation: &'a mut AgentInvocation,
        tracer: &'a Tracer,
        prompt: &'a str,
        history: Vec<ChatMessage>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.run_loop(invocation, tracer, prompt, history).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    invocation.state = InvocationState::Failed;
                    self.report_failure(invocation, &error).await;
                    Err(error)
                }
            }
        })
    }

    async fn run_loop(
        &self,
        inv: &mut AgentInvocation,
        tracer: &Tracer,
        prompt: &str,
        history: Vec<ChatMessage>,
    ) -> Result<()> {
        let hooks = &self.options.hooks;
        let config = &self.options.config;
        let agent_id = inv.id().to_string();
        inv.state = InvocationState::Running;

        hooks
            .emit_checked(HookPayload::BeforeAgentStart(BeforeAgentStart {
                id: agent_id.clone(),
                parent_id: inv.parent_id().map(ToString::to_string),
                depth: inv.depth(),
                is_root: inv.is_root(),
                tools: self.tool_specs(inv).into_iter().map(|s| s.name).collect(),
                model: inv.descriptor().model.clone(),
                provider: inv.descriptor().provider_name().to_string(),
            }))
            .await?;
        tracer
            .record(
                TracePhase::AgentStart,
                inv,
                json!({
                    "agent": inv.definition().id,
                    "model": inv.descriptor().model,
                    "provider": inv.descriptor().provider_name(),
                    "prompt": prompt,
                }),
            )
            .await;
        tracing::info!(agent_id = %agent_id, depth = inv.depth(), "Agent started");

        let (system, user) = {
            let ctx = PromptContext {
                definition: inv.definition(),
                agent_id: &agent_id,
                prompt,
                context: inv.context(),
                history: &history,
                variables: inv.variables(),
            };
            (
                self.options.templates.render_system_prompt(&ctx)?,
                self.options.templates.render_user_prompt(&ctx)?,
            )
        };
        inv.messages.push(ChatMessage::system(system));
        inv.messages.extend(history);
        inv.prompt_index = Some(inv.messages.len());
        inv.messages.push(ChatMessage::user(user));

        let specs = self.tool_specs(inv);
        loop {
            if self.options.cancellation.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if inv.iterations >= config.max_iterations {
                tracing::warn!(
                    agent_id = %agent_id,
                    max_iterations = config.max_iterations,
                    "Iteration limit reached; ending invocation"
                );
                inv.truncated = true;
                break;
            }
            inv.iterations += 1;

            hooks
                .emit_checked(HookPayload::BeforeModelCall(BeforeModelCall {
                    agent_id: agent_id.clone(),
                    iteration: inv.iterations,
                    message_count: inv.messages.len(),
                }))
                .await?;
            tracer
                .record(
                    TracePhase::ModelCall,
                    inv,
                    json!({ "message_count": inv.messages.len(), "tools": specs.len() }),
                )
                .await;

            let tool_calls = self.stream_iteration(inv, tracer, &specs).await?;
            self.options.renderer.flush();
            tracer
                .record(
                    TracePhase::IterationComplete,
                    inv,
                    json!({ "tool_calls": tool_calls, "message_count": inv.messages.len() }),
                )
                .await;
            self.compact(inv).await?;

            if tool_calls > 0 {
                continue;
            }

            let stop = hooks
                .emit_checked(HookPayload::Stop(Stop {
                    agent_id: agent_id.clone(),
                    iterations: inv.iterations,
                    messages: inv.messages.clone(),
                }))
                .await?;
            let enqueued = stop.enqueued();
            if enqueued.is_empty() {
                break;
            }
            tracing::debug!(agent_id = %agent_id, messages = enqueued.len(), "Stop hook continued the run");
            inv.messages.extend(enqueued);
        }

        hooks
            .emit_checked(HookPayload::AfterAgentComplete(AfterAgentComplete {
                agent_id: agent_id.clone(),
                iterations: inv.iterations,
                messages: inv.messages.clone(),
            }))
            .await?;
        inv.state = InvocationState::Completed;
        tracer
            .record(
                TracePhase::AgentComplete,
                inv,
                json!({
                    "iterations": inv.iterations,
                    "truncated": inv.truncated,
                    "usage": inv.usage,
                }),
            )
            .await;
        tracing::info!(
            agent_id = %agent_id,
            iterations = inv.iterations,
            truncated = inv.truncated,
            "Agent completed"
        );
        Ok(())
    }

    /// One model call. Returns the number of tool calls handled.
    async fn stream_iteration(
        &self,
        inv: &mut AgentInvocation,
        tracer: &Tracer,
        specs: &[ToolSpec],
    ) -> Result<usize> {
        let agent_id = inv.id().to_string();
        let descriptor = inv.descriptor().clone();
        let options = StreamOptions {
            model: descriptor.model.clone(),
            messages: inv.messages.clone(),
            tools: specs.to_vec(),
            response_format: None,
            metadata: descriptor.metadata.clone(),
            previous_response_id: inv.last_response_id.clone(),
            cancellation: self.options.cancellation.child_token(),
        };
        let mut stream = descriptor.provider.stream(options);

        let mut tool_calls = 0;
        let mut turn = None;
        while let Some(event) = stream.next().await {
            self.options
                .renderer
                .render(&AgentEvent::new(agent_id.clone(), event.clone()));

            match event {
                StreamEvent::Delta { text } => inv.append_assistant(&text, false, &mut turn),
                StreamEvent::ReasoningDelta { text } => inv.append_assistant(&text, true, &mut turn),
                StreamEvent::ReasoningEnd | StreamEvent::ToolResult { .. } => {}
                StreamEvent::ToolCall(call) => {
                    tool_calls += 1;
                    self.handle_tool_call(inv, tracer, call, &mut turn).await?;
                }
                StreamEvent::Notification { payload, metadata } => {
                    self.options
                        .hooks
                        .emit(HookPayload::Notification(Notification {
                            agent_id: agent_id.clone(),
                            payload,
                            metadata,
                        }))
                        .await;
                }
                StreamEvent::Error { message, cause } => {
                    tracing::warn!(agent_id = %agent_id, error = %message, cause = ?cause, "Stream error");
                    self.options
                        .hooks
                        .emit(HookPayload::StreamError(StreamError {
                            agent_id: agent_id.clone(),
                            message: message.clone(),
                            cause,
                        }))
                        .await;
                    match self.options.config.stream_error_policy {
                        StreamErrorPolicy::Continue => {}
                        StreamErrorPolicy::EndIteration => break,
                        StreamErrorPolicy::Fail => return Err(AgentError::Stream(message)),
                    }
                }
                StreamEvent::End {
                    reason,
                    usage,
                    response_id,
                } => {
                    if let Some(usage) = usage {
                        inv.usage.accumulate(&usage);
                    }
                    if response_id.is_some() {
                        inv.last_response_id = response_id;
                    }
                    tracing::debug!(agent_id = %agent_id, reason = ?reason, "Model call ended");
                    break;
                }
            }
        }
        Ok(tool_calls)
    }

    // ── Tool calls ───────────────────────────────────────────────────────

    async fn handle_tool_call(
        &self,
        inv: &mut AgentInvocation,
        tracer: &Tracer,
        call: ToolCallEvent,
        turn: &mut Option<usize>,
    ) -> Result<()> {
        let hooks = &self.options.hooks;
        let agent_id = inv.id().to_string();
        let call_id = call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        let name = call.name;
        let arguments = coerce_arguments(call.arguments);

        inv.record_tool_call(
            ToolCallRecord {
                id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            },
            turn,
        );
        tracer
            .record(
                TracePhase::ToolCall,
                inv,
                json!({ "tool": name, "tool_call_id": call_id, "arguments": arguments }),
            )
            .await;

        let pre = hooks
            .emit_checked(HookPayload::PreToolUse(PreToolUse {
                agent_id: agent_id.clone(),
                tool: name.clone(),
                tool_call_id: call_id.clone(),
                arguments: arguments.clone(),
            }))
            .await?;
        if let Some(blocked) = pre.blocked {
            let reason = blocked
                .reason
                .unwrap_or_else(|| format!("Tool call `{name}` was blocked"));
            tracing::info!(agent_id = %agent_id, tool = %name, reason = %reason, "Tool call vetoed");
            inv.messages.push(ChatMessage::tool(&call_id, reason.clone()));
            tracer
                .record(
                    TracePhase::ToolResult,
                    inv,
                    json!({ "tool": name, "tool_call_id": call_id, "status": "blocked", "reason": reason }),
                )
                .await;
            return Ok(());
        }

        let outcome = if name == SPAWN_SUBAGENT_TOOL && self.delegation_enabled(inv) {
            self.delegate(inv, tracer, arguments).await
        } else {
            let ctx = ToolContext::new(self.options.cwd.clone())
                .with_env(self.options.env.clone())
                .with_confirm(self.options.confirm.clone())
                .with_cancellation(self.options.cancellation.child_token())
                .for_call(agent_id.clone(), call_id.clone());
            inv.tools().execute(&name, arguments, &ctx).await
        };

        match outcome {
            Ok(result) => {
                hooks
                    .emit_checked(HookPayload::PostToolUse(PostToolUse {
                        agent_id: agent_id.clone(),
                        tool: name.clone(),
                        tool_call_id: call_id.clone(),
                        result: result.clone(),
                    }))
                    .await?;
                inv.messages
                    .push(ChatMessage::tool(&call_id, serde_json::to_string(&result)?));
                tracer
                    .record(
                        TracePhase::ToolResult,
                        inv,
                        json!({ "tool": name, "tool_call_id": call_id, "status": "ok", "schema": result.schema }),
                    )
                    .await;
            }
            Err(error) if error.is_recoverable() => {
                let text = format!("Tool execution failed: {}", error.failure_message());
                tracing::warn!(agent_id = %agent_id, tool = %name, error = %error, "Tool failed");

                let mut metadata = Map::new();
                metadata.insert("tool".to_string(), Value::String(name.clone()));
                metadata.insert("tool_call_id".to_string(), Value::String(call_id.clone()));
                metadata.insert("severity".to_string(), Value::String("error".to_string()));
                let payload = Value::String(text.clone());
                self.options.renderer.render(&AgentEvent::new(
                    agent_id.clone(),
                    StreamEvent::notification(payload.clone(), Some(metadata.clone())),
                ));
                hooks
                    .emit(HookPayload::Notification(Notification {
                        agent_id: agent_id.clone(),
                        payload,
                        metadata: Some(metadata),
                    }))
                    .await;

                inv.messages.push(ChatMessage::tool(&call_id, text.clone()));
                tracer
                    .record(
                        TracePhase::ToolResult,
                        inv,
                        json!({ "tool": name, "tool_call_id": call_id, "status": "failed", "error": text }),
                    )
                    .await;
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    /// Handle a `spawn_subagent` call: run the child and hand back its answer.
    async fn delegate(
        &self,
        parent: &mut AgentInvocation,
        tracer: &Tracer,
        arguments: Value,
    ) -> Result<ToolResult> {
        let issues = CompiledSchema::compile(&spawn_parameters())?.validate(&arguments);
        if !issues.is_empty() {
            return Err(ValidationError::arguments(SPAWN_SUBAGENT_TOOL, issues).into());
        }
        let args: SpawnArgs = serde_json::from_value(arguments)?;

        let catalog = &self.options.catalog;
        let Some(agent) = catalog.subagent(&args.agent) else {
            let available: Vec<String> = catalog.list_subagents().into_iter().map(|a| a.id).collect();
            return Err(AgentError::tool(
                SPAWN_SUBAGENT_TOOL,
                format!(
                    "Unknown subagent `{}`. Available: {}",
                    args.agent,
                    if available.is_empty() { "none".to_string() } else { available.join(", ") }
                ),
            ));
        };
        let max_depth = self.options.config.max_depth;
        if parent.depth() + 1 > max_depth {
            return Err(AgentError::tool(
                SPAWN_SUBAGENT_TOOL,
                format!("Subagent depth limit ({max_depth}) reached"),
            ));
        }

        let request = SpawnRequest {
            agent,
            prompt: args.prompt,
            context: args.context.unwrap_or_default(),
            variables: HashMap::new(),
        };
        let index = self.spawn_child(parent, tracer, request).await?;
        let child = &parent.children[index];
        Ok(ToolResult::structured(
            SUBAGENT_RESULT_SCHEMA,
            child.final_message().unwrap_or_default(),
            json!({
                "agent": child.definition().id,
                "invocation_id": child.id().to_string(),
                "iterations": child.iterations(),
                "truncated": child.truncated(),
            }),
        ))
    }

    /// Register a child under `parent`, run it, and return its index.
    async fn spawn_child(
        &self,
        parent: &mut AgentInvocation,
        tracer: &Tracer,
        request: SpawnRequest,
    ) -> Result<usize> {
        let tools = self.registry_for(&request.agent);
        let child = AgentInvocation::new(
            request.agent,
            tools,
            Some(&parent.link()),
            request.context,
            request.variables,
        );
        let parent_id = parent.id().to_string();
        let child_id = child.id().to_string();
        let agent = child.definition().id.clone();

        self.options
            .hooks
            .emit_checked(HookPayload::BeforeSpawnSubagent(BeforeSpawnSubagent {
                parent_id: parent_id.clone(),
                child_id: child_id.clone(),
                agent: agent.clone(),
                depth: child.depth(),
                prompt: request.prompt.clone(),
            }))
            .await?;
        tracing::info!(parent_id = %parent_id, child_id = %child_id, agent = %agent, "Spawning subagent");

        let index = parent.children.len();
        parent.children.push(child);
        let child = &mut parent.children[index];
        self.drive(child, tracer, &request.prompt, Vec::new()).await?;

        self.options
            .hooks
            .emit_checked(HookPayload::SubagentStop(SubagentStop {
                parent_id,
                child_id,
                agent,
                iterations: child.iterations(),
                output: child.final_message().unwrap_or_default().to_string(),
            }))
            .await?;
        Ok(index)
    }

    // ── Compaction and failure ───────────────────────────────────────────

    async fn compact(&self, inv: &mut AgentInvocation) -> Result<()> {
        let Some(compactor) = &self.options.compactor else {
            return Ok(());
        };
        let Some(plan) = compactor.plan(inv).await else {
            return Ok(());
        };
        let agent_id = inv.id().to_string();
        let before = inv.messages.len();

        let pre = self
            .options
            .hooks
            .emit_checked(HookPayload::PreCompact(PreCompact {
                agent_id: agent_id.clone(),
                message_count: before,
                reason: plan.reason().map(str::to_string),
            }))
            .await?;
        if pre.is_blocked() {
            tracing::debug!(agent_id = %agent_id, reason = ?pre.block_reason(), "Compaction skipped by hook");
            return Ok(());
        }

        inv.state = InvocationState::Compacting;
        let result = plan.apply(&mut inv.messages).await;
        inv.state = InvocationState::Running;
        match result {
            Ok(outcome) => tracing::info!(
                agent_id = %agent_id,
                before,
                after = inv.messages.len(),
                removed = outcome.removed_messages,
                "Compacted transcript"
            ),
            Err(e) => tracing::warn!(agent_id = %agent_id, error = %e, "Compaction failed; continuing"),
        }
        Ok(())
    }

    async fn report_failure(&self, inv: &AgentInvocation, error: &AgentError) {
        tracing::error!(agent_id = %inv.id(), error = %error, "Agent failed");
        let stack: Vec<String> = std::iter::successors(
            Some(error as &(dyn std::error::Error + 'static)),
            |&e| e.source(),
        )
        .map(ToString::to_string)
        .collect();
        self.options
            .hooks
            .emit(HookPayload::OnAgentError(OnAgentError {
                agent_id: inv.id().to_string(),
                message: error.to_string(),
                stack,
                cause: error.source().map(ToString::to_string),
            }))
            .await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook-bus agent runner
// ─────────────────────────────────────────────────────────────────────────────

struct OrchestratorRunner(Weak<Orchestrator>);

#[async_trait]
impl AgentRunner for OrchestratorRunner {
    async fn run_agent(&self, agent_id: &str, prompt: &str) -> std::result::Result<String, HookError> {
        let orchestrator = self
            .0
            .upgrade()
            .ok_or_else(|| HookError::new("orchestrator has been dropped"))?;
        let catalog = &orchestrator.options.catalog;
        let agent = catalog
            .agent(agent_id)
            .or_else(|| catalog.subagent(agent_id))
            .ok_or_else(|| HookError::new(format!("Unknown agent `{agent_id}`")))?;

        // Delegated runs share the trace file with the run that triggered them.
        let tracer = orchestrator.tracer(true);
        let invocation = orchestrator
            .run_traced(RunRequest::new(agent, prompt), &tracer)
            .await
            .map_err(|e| HookError::new(e.to_string()))?;
        Ok(invocation.final_message().unwrap_or_default().to_string())
    }
}
