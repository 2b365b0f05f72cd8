//! End-to-end behaviour of the turn loop, driven by scripted adapters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arbor_agent::{
    AgentDefinition, AgentError, AgentInvocation, AgentRuntimeDescriptor, ChatMessage, CollectingRenderer,
    CompactionOutcome, CompactionPlan, FnTool, JsonlTraceSink, LoopConfig, MemoryTraceSink, Orchestrator,
    Role, RunRequest, RuntimeOptions, SpawnRequest, StaticCatalog, StreamErrorPolicy, StreamEvent, ToolError, ToolRegistry,
    ToolResult, TracePhase, TraceRecord, TranscriptCompactor, Usage, WindowCompactor, collect_invocations,
};
use arbor_hooks::{HookBus, HookError, HookEvent, HookFailure, HookPayload, HookResponse, SharedHookBus};
use arbor_llm::ScriptedAdapter;
use async_trait::async_trait;
use serde_json::{Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

fn descriptor(id: &str, adapter: Arc<ScriptedAdapter>) -> AgentRuntimeDescriptor {
    AgentRuntimeDescriptor::new(AgentDefinition::new(id, format!("You are {id}.")), adapter, "test-model")
}

fn scripted(scripts: Vec<Vec<StreamEvent>>) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(scripts))
}

fn text(reply: &str) -> Vec<StreamEvent> {
    vec![StreamEvent::delta(reply), StreamEvent::end("stop")]
}

fn call(id: &str, name: &str, arguments: Value) -> Vec<StreamEvent> {
    vec![StreamEvent::tool_call(id, name, arguments), StreamEvent::end("tool_calls")]
}

fn echo_tool(invocations: Arc<AtomicUsize>) -> FnTool {
    FnTool::new(
        "echo",
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }),
        move |args, _ctx| {
            let invocations = invocations.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(ToolResult::text(args["text"].as_str().unwrap_or_default()))
            }
        },
    )
}

struct Harness {
    hooks: SharedHookBus,
    renderer: Arc<CollectingRenderer>,
    traces: Arc<MemoryTraceSink>,
    tool_calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self {
            hooks: Arc::new(HookBus::new()),
            renderer: Arc::new(CollectingRenderer::new()),
            traces: Arc::new(MemoryTraceSink::new()),
            tool_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn options(&self, catalog: StaticCatalog) -> RuntimeOptions {
        let mut tools = ToolRegistry::new();
        tools.register(echo_tool(self.tool_calls.clone())).unwrap();
        tools
            .register(FnTool::new("explode", json!({"type": "object"}), |_, _| async {
                Err(ToolError::new("boom"))
            }))
            .unwrap();

        RuntimeOptions::new(Arc::new(catalog), std::env::temp_dir())
            .with_hooks(self.hooks.clone())
            .with_tools(tools)
            .with_renderer(self.renderer.clone())
            .with_trace_sink(self.traces.clone())
            .with_trace("trace.jsonl", false)
    }

    /// Record every payload dispatched for `event`.
    fn record(&self, event: HookEvent) -> Arc<Mutex<Vec<HookPayload>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        self.hooks.on_fn(event, move |payload| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(HookResponse::Ack)
            }
        });
        log
    }
}

fn roles(invocation: &AgentInvocation) -> Vec<Role> {
    invocation.messages().iter().map(|m| m.role).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcript shape
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_run_produces_system_user_assistant() {
    let harness = Harness::new();
    let agent = descriptor("solo", Arc::new(ScriptedAdapter::with_text("Hello there")));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new().with_manager(agent.clone())));

    let invocation = orchestrator
        .run_agent(RunRequest::new(agent, "hi"))
        .await
        .unwrap();

    assert_eq!(roles(&invocation), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(invocation.messages()[0].content, "You are solo.");
    assert_eq!(invocation.messages()[1].content, "hi");
    assert_eq!(invocation.final_message(), Some("Hello there"));
    assert_eq!(invocation.iterations(), 1);
    assert!(!invocation.truncated());
}

#[tokio::test]
async fn test_history_sits_between_system_and_user() {
    let harness = Harness::new();
    let agent = descriptor("solo", Arc::new(ScriptedAdapter::with_text("ok")));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(
            RunRequest::new(agent, "next")
                .with_history(vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")]),
        )
        .await
        .unwrap();

    assert_eq!(
        roles(&invocation),
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(invocation.messages()[3].content, "next");
}

#[tokio::test]
async fn test_tool_call_gets_exactly_one_matching_tool_message() {
    let harness = Harness::new();
    let adapter = scripted(vec![call("c1", "echo", json!({"text": "ping"})), text("done")]);
    let agent = descriptor("solo", adapter.clone());
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator.run_agent(RunRequest::new(agent, "go")).await.unwrap();

    assert_eq!(
        roles(&invocation),
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    let messages = invocation.messages();
    assert_eq!(messages[2].tool_calls[0].id, "c1");
    let tool_messages: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.tool_call_id.as_deref() == Some("c1"))
        .collect();
    assert_eq!(tool_messages.len(), 1);
    let result: ToolResult = serde_json::from_str(&tool_messages[0].content).unwrap();
    assert_eq!(result.content, "ping");

    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.request_count(), 2);
    assert_eq!(adapter.requests()[1].messages.len(), 4);
}

#[tokio::test]
async fn test_string_arguments_are_parsed() {
    let harness = Harness::new();
    let adapter = scripted(vec![
        call("c1", "echo", Value::String("{\"text\":\"from string\"}".to_string())),
        text("done"),
    ]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    assert_eq!(invocation.messages()[2].tool_calls[0].arguments, json!({"text": "from string"}));
    assert!(invocation.messages()[3].content.contains("from string"));
}

#[tokio::test]
async fn test_usage_and_response_id_carry_across_calls() {
    let harness = Harness::new();
    let adapter = scripted(vec![
        vec![
            StreamEvent::tool_call("c1", "echo", json!({"text": "x"})),
            StreamEvent::End {
                reason: Some("tool_calls".to_string()),
                usage: Some(Usage::new(10, 5)),
                response_id: Some("resp_1".to_string()),
            },
        ],
        vec![
            StreamEvent::delta("done"),
            StreamEvent::End {
                reason: Some("stop".to_string()),
                usage: Some(Usage::new(20, 3)),
                response_id: None,
            },
        ],
    ]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap();

    assert_eq!(invocation.usage(), Usage::new(30, 8));
    assert_eq!(invocation.last_response_id(), Some("resp_1"));
    assert_eq!(adapter.requests()[1].previous_response_id.as_deref(), Some("resp_1"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Subagents
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spawned_subagent_is_nested_and_collected_preorder() {
    let harness = Harness::new();
    let spawns = harness.record(HookEvent::BeforeSpawnSubagent);
    let stops = harness.record(HookEvent::SubagentStop);

    let manager_adapter = scripted(vec![
        call("s1", "spawn_subagent", json!({"agent": "writer", "prompt": "write a draft"})),
        text("all done"),
    ]);
    let manager = descriptor("manager", manager_adapter.clone());
    let writer = descriptor("writer", Arc::new(ScriptedAdapter::with_text("the draft")));
    let catalog = StaticCatalog::new().with_manager(manager.clone()).with_subagent(writer);
    let orchestrator = Orchestrator::new(harness.options(catalog));

    let root = orchestrator.run_agent(RunRequest::new(manager, "plan")).await.unwrap();

    assert!(root.is_root());
    assert_eq!(root.children().len(), 1);
    let child = &root.children()[0];
    assert_eq!(child.depth(), root.depth() + 1);
    assert!(!child.is_root());
    assert_eq!(child.parent_id(), Some(root.id()));
    assert_eq!(child.messages()[1].content, "write a draft");

    let order: Vec<String> = collect_invocations(&root).iter().map(|i| i.id().to_string()).collect();
    assert_eq!(order, vec![root.id().to_string(), child.id().to_string()]);

    let tool_message = root
        .messages()
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("s1"))
        .unwrap();
    let result: ToolResult = serde_json::from_str(&tool_message.content).unwrap();
    assert_eq!(result.content, "the draft");
    assert_eq!(root.final_message(), Some("all done"));

    let advertised: Vec<String> = manager_adapter.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert!(advertised.contains(&"spawn_subagent".to_string()));

    assert_eq!(spawns.lock().unwrap().len(), 1);
    match &stops.lock().unwrap()[0] {
        HookPayload::SubagentStop(stop) => assert_eq!(stop.output, "the draft"),
        other => panic!("unexpected payload: {other:?}"),
    }

    let child_events = harness.renderer.events_for(child.id().as_str());
    assert!(child_events.contains(&arbor_agent::AgentEvent::new(
        child.id().to_string(),
        StreamEvent::delta("the draft")
    )));
}

#[tokio::test]
async fn test_unknown_subagent_is_recoverable() {
    let harness = Harness::new();
    let manager = descriptor(
        "manager",
        scripted(vec![
            call("s1", "spawn_subagent", json!({"agent": "ghost", "prompt": "boo"})),
            text("recovered"),
        ]),
    );
    let writer = descriptor("writer", scripted(vec![]));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new().with_subagent(writer)));

    let root = orchestrator.run_agent(RunRequest::new(manager, "go")).await.unwrap();

    assert!(root.children().is_empty());
    assert_eq!(
        root.messages()[3].content,
        "Tool execution failed: Unknown subagent `ghost`. Available: writer"
    );
    assert_eq!(root.final_message(), Some("recovered"));
}

#[tokio::test]
async fn test_depth_limit_is_recoverable() {
    let harness = Harness::new();
    let manager = descriptor(
        "manager",
        scripted(vec![
            call("s1", "spawn_subagent", json!({"agent": "writer", "prompt": "go deeper"})),
            text("stopped"),
        ]),
    );
    let writer = descriptor("writer", scripted(vec![]));
    let options = harness
        .options(StaticCatalog::new().with_subagent(writer))
        .with_config(LoopConfig::default().with_max_depth(0));
    let orchestrator = Orchestrator::new(options);

    let root = orchestrator.run_agent(RunRequest::new(manager, "go")).await.unwrap();

    assert!(root.children().is_empty());
    assert!(root.messages()[3].content.contains("depth limit (0) reached"));
}

#[tokio::test]
async fn test_spawn_tool_hidden_when_subagents_disabled() {
    let harness = Harness::new();
    let adapter = Arc::new(ScriptedAdapter::with_text("ok"));
    let writer = descriptor("writer", scripted(vec![]));
    let catalog = StaticCatalog::new()
        .with_subagent(writer)
        .with_subagents_enabled(false);
    let orchestrator = Orchestrator::new(harness.options(catalog));

    orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap();

    let names: Vec<String> = adapter.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(names, vec!["echo", "explode"]);
}

#[tokio::test]
async fn test_explicit_spawn_under_existing_invocation() {
    let harness = Harness::new();
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));
    let mut root = orchestrator
        .run_agent(RunRequest::new(
            descriptor("root", Arc::new(ScriptedAdapter::with_text("root"))),
            "go",
        ))
        .await
        .unwrap();

    let helper = descriptor("helper", Arc::new(ScriptedAdapter::with_text("helped")));
    let child = orchestrator
        .spawn(&mut root, SpawnRequest::new(helper, "assist").with_context("notes"))
        .await
        .unwrap();

    assert_eq!(child.depth(), 1);
    assert_eq!(child.final_message(), Some("helped"));
    assert!(child.messages()[0].content.contains("notes"));
    assert_eq!(root.children().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks around tool calls
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pre_tool_use_block_vetoes_the_call() {
    let harness = Harness::new();
    let post = harness.record(HookEvent::PostToolUse);
    harness.hooks.on_fn(HookEvent::PreToolUse, |_| async {
        Ok(HookResponse::block("echo is not allowed here"))
    });
    let adapter = scripted(vec![call("c1", "echo", json!({"text": "x"})), text("fine")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 0);
    assert!(post.lock().unwrap().is_empty());
    let tool_message = &invocation.messages()[3];
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_message.content, "echo is not allowed here");
}

#[tokio::test]
async fn test_handler_failure_becomes_notification() {
    let harness = Harness::new();
    let notifications = harness.record(HookEvent::Notification);
    let adapter = scripted(vec![call("c1", "explode", json!({})), text("moving on")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    let rendered: Vec<(Value, Value)> = harness
        .renderer
        .events()
        .into_iter()
        .filter_map(|e| match e.event {
            StreamEvent::Notification { payload, metadata } => {
                Some((payload, Value::Object(metadata.unwrap_or_default())))
            }
            _ => None,
        })
        .collect();
    assert_eq!(rendered.len(), 1);
    assert!(
        rendered[0]
            .0
            .as_str()
            .unwrap()
            .contains("Tool execution failed: boom")
    );
    assert_eq!(rendered[0].1["severity"], "error");
    assert_eq!(rendered[0].1["tool_call_id"], "c1");

    assert_eq!(notifications.lock().unwrap().len(), 1);
    assert_eq!(invocation.messages()[3].content, "Tool execution failed: boom");
    assert_eq!(invocation.final_message(), Some("moving on"));
}

#[tokio::test]
async fn test_unknown_tool_is_recoverable() {
    let harness = Harness::new();
    let adapter = scripted(vec![call("c1", "teleport", json!({})), text("ok")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    assert!(invocation.messages()[3].content.contains("Tool not found: teleport"));
}

#[tokio::test]
async fn test_pre_tool_use_error_fails_the_run() {
    let harness = Harness::new();
    let errors = harness.record(HookEvent::OnAgentError);
    harness.hooks.on_fn(HookEvent::PreToolUse, |_| async {
        Err(HookError::new("pre-hook failure"))
    });
    let adapter = scripted(vec![call("c1", "echo", json!({"text": "x"})), text("unreachable")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let err = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("pre-hook failure"));
    assert!(matches!(err, AgentError::Hook(HookFailure::Listener { .. })));
    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 0);
    match &errors.lock().unwrap()[0] {
        HookPayload::OnAgentError(e) => {
            assert!(e.message.contains("pre-hook failure"));
            assert_eq!(e.cause.as_deref(), Some("pre-hook failure"));
            assert_eq!(e.stack.len(), 2);
            assert_eq!(e.stack[0], e.message);
            assert_eq!(e.stack[1], "pre-hook failure");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_arguments_fail_the_run() {
    let harness = Harness::new();
    let adapter = scripted(vec![call("c1", "echo", json!({})), text("unreachable")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let err = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Validation(_)));
    assert!(err.to_string().contains("Field `arguments.text` is required"));
}

#[tokio::test]
async fn test_before_agent_start_block_is_ignored() {
    let harness = Harness::new();
    harness.hooks.on_fn(HookEvent::BeforeAgentStart, |_| async {
        Ok(HookResponse::block("not today"))
    });
    let adapter = Arc::new(ScriptedAdapter::with_text("started anyway"));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap();

    assert_eq!(invocation.final_message(), Some("started anyway"));
    assert_eq!(adapter.request_count(), 1);
}

#[tokio::test]
async fn test_before_agent_start_error_fails_the_run() {
    let harness = Harness::new();
    harness.hooks.on_fn(HookEvent::BeforeAgentStart, |_| async {
        Err(HookError::new("bootstrap failed"))
    });
    let adapter = Arc::new(ScriptedAdapter::with_text("never"));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let err = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Hook(HookFailure::Listener { .. })));
    assert_eq!(adapter.request_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop control
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_iteration_limit_truncates() {
    let harness = Harness::new();
    let completions = harness.record(HookEvent::AfterAgentComplete);
    let stops = harness.record(HookEvent::Stop);
    let adapter = scripted(vec![
        call("c1", "echo", json!({"text": "1"})),
        call("c2", "echo", json!({"text": "2"})),
        call("c3", "echo", json!({"text": "3"})),
    ]);
    let options = harness
        .options(StaticCatalog::new())
        .with_config(LoopConfig::default().with_max_iterations(2));
    let orchestrator = Orchestrator::new(options);

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap();

    assert!(invocation.truncated());
    assert_eq!(invocation.iterations(), 2);
    assert_eq!(adapter.request_count(), 2);
    assert_eq!(invocation.state(), arbor_agent::InvocationState::Completed);
    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(stops.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_continue_resumes_loop() {
    let harness = Harness::new();
    let completions = harness.record(HookEvent::AfterAgentComplete);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness.hooks.on_fn(HookEvent::Stop, move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(HookResponse::continue_with(vec![ChatMessage::user("keep going")]))
            } else {
                Ok(HookResponse::Ack)
            }
        }
    });
    let adapter = scripted(vec![text("first"), text("second")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    assert_eq!(
        roles(&invocation),
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(invocation.messages()[3].content, "keep going");
    assert_eq!(invocation.final_message(), Some("second"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(completions.lock().unwrap().len(), 1);
}

fn error_script() -> Vec<Vec<StreamEvent>> {
    vec![vec![
        StreamEvent::delta("a"),
        StreamEvent::error_with_cause("upstream hiccup", "502"),
        StreamEvent::delta("b"),
        StreamEvent::end("stop"),
    ]]
}

async fn run_with_policy(policy: StreamErrorPolicy) -> (Harness, arbor_agent::Result<AgentInvocation>) {
    let harness = Harness::new();
    let options = harness
        .options(StaticCatalog::new())
        .with_config(LoopConfig::default().with_stream_error_policy(policy));
    let orchestrator = Orchestrator::new(options);
    let result = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", scripted(error_script())), "go"))
        .await;
    (harness, result)
}

#[tokio::test]
async fn test_stream_error_continue() {
    let (harness, result) = run_with_policy(StreamErrorPolicy::Continue).await;
    assert_eq!(result.unwrap().final_message(), Some("ab"));
    assert!(harness.renderer.events().iter().any(|e| e.event.kind() == "error"));
}

#[tokio::test]
async fn test_stream_error_end_iteration() {
    let harness = Harness::new();
    let errors = harness.record(HookEvent::StreamError);
    let options = harness
        .options(StaticCatalog::new())
        .with_config(LoopConfig::default().with_stream_error_policy(StreamErrorPolicy::EndIteration));
    let orchestrator = Orchestrator::new(options);

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", scripted(error_script())), "go"))
        .await
        .unwrap();

    assert_eq!(invocation.final_message(), Some("a"));
    match &errors.lock().unwrap()[0] {
        HookPayload::StreamError(e) => {
            assert_eq!(e.message, "upstream hiccup");
            assert_eq!(e.cause.as_deref(), Some("502"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_error_fail() {
    let (_harness, result) = run_with_policy(StreamErrorPolicy::Fail).await;
    assert!(matches!(result.unwrap_err(), AgentError::Stream(message) if message == "upstream hiccup"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Compaction
// ─────────────────────────────────────────────────────────────────────────────

type ApplyLog = Arc<Mutex<Vec<(usize, usize, usize)>>>;

/// Wraps the window compactor and records sizes around every apply.
struct RecordingCompactor {
    inner: WindowCompactor,
    log: ApplyLog,
}

struct RecordingPlan {
    inner: Box<dyn CompactionPlan>,
    log: ApplyLog,
}

#[async_trait]
impl TranscriptCompactor for RecordingCompactor {
    async fn plan(&self, invocation: &AgentInvocation) -> Option<Box<dyn CompactionPlan>> {
        let inner = self.inner.plan(invocation).await?;
        Some(Box::new(RecordingPlan {
            inner,
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl CompactionPlan for RecordingPlan {
    fn reason(&self) -> Option<&str> {
        self.inner.reason()
    }

    async fn apply(self: Box<Self>, messages: &mut Vec<ChatMessage>) -> arbor_agent::Result<CompactionOutcome> {
        let RecordingPlan { inner, log } = *self;
        let before = messages.len();
        let outcome = inner.apply(messages).await?;
        log.lock().unwrap().push((before, outcome.removed_messages, messages.len()));
        Ok(outcome)
    }
}

fn compaction_script() -> Arc<ScriptedAdapter> {
    scripted(vec![
        call("c1", "echo", json!({"text": "1"})),
        call("c2", "echo", json!({"text": "2"})),
        text("done"),
    ])
}

#[tokio::test]
async fn test_pre_compact_sees_size_before_apply() {
    let harness = Harness::new();
    let pre_compact = harness.record(HookEvent::PreCompact);
    let log: ApplyLog = Arc::new(Mutex::new(Vec::new()));
    let compactor = RecordingCompactor {
        inner: WindowCompactor::new(4).with_keep_recent(2),
        log: log.clone(),
    };
    let options = harness
        .options(StaticCatalog::new())
        .with_compactor(Arc::new(compactor));
    let orchestrator = Orchestrator::new(options);

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", compaction_script()), "go"))
        .await
        .unwrap();

    let counts: Vec<usize> = pre_compact
        .lock()
        .unwrap()
        .iter()
        .map(|p| match p {
            HookPayload::PreCompact(p) => p.message_count,
            other => panic!("unexpected payload: {other:?}"),
        })
        .collect();
    let applied = log.lock().unwrap().clone();
    assert_eq!(applied, vec![(6, 2, 4), (5, 0, 5)]);
    assert_eq!(counts, applied.iter().map(|(before, _, _)| *before).collect::<Vec<_>>());
    for (before, removed, after) in &applied {
        assert_eq!(before - removed, *after);
    }

    // The surviving tool message still follows the call that produced it.
    let messages = invocation.messages();
    assert_eq!(
        roles(&invocation),
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[2].tool_calls[0].id, "c2");
    assert_eq!(messages[3].tool_call_id.as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_pre_compact_block_skips_compaction() {
    let harness = Harness::new();
    harness.hooks.on_fn(HookEvent::PreCompact, |_| async {
        Ok(HookResponse::block("keep everything"))
    });
    let options = harness
        .options(StaticCatalog::new())
        .with_compactor(Arc::new(WindowCompactor::new(4).with_keep_recent(2)));
    let orchestrator = Orchestrator::new(options);

    let invocation = orchestrator
        .run_agent(RunRequest::new(descriptor("solo", compaction_script()), "go"))
        .await
        .unwrap();

    assert_eq!(invocation.messages().len(), 7);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_trace_records_follow_the_lifecycle() {
    let harness = Harness::new();
    let adapter = scripted(vec![call("c1", "echo", json!({"text": "x"})), text("done")]);
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    orchestrator
        .run_agent(RunRequest::new(descriptor("solo", adapter), "go"))
        .await
        .unwrap();

    let phases: Vec<TracePhase> = harness.traces.records().iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            TracePhase::AgentStart,
            TracePhase::ModelCall,
            TracePhase::ToolCall,
            TracePhase::ToolResult,
            TracePhase::IterationComplete,
            TracePhase::ModelCall,
            TracePhase::IterationComplete,
            TracePhase::AgentComplete,
        ]
    );
    let flags = harness.traces.append_flags();
    assert!(!flags[0]);
    assert!(flags[1..].iter().all(|append| *append));
}

#[tokio::test]
async fn test_trace_append_mode_never_truncates() {
    let harness = Harness::new();
    let options = harness
        .options(StaticCatalog::new())
        .with_trace("trace.jsonl", true);
    let orchestrator = Orchestrator::new(options);

    orchestrator
        .run_agent(RunRequest::new(
            descriptor("solo", Arc::new(ScriptedAdapter::with_text("hi"))),
            "go",
        ))
        .await
        .unwrap();

    assert!(harness.traces.append_flags().iter().all(|append| *append));
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions and the agent runner
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_hooks_bracket_the_run() {
    let harness = Harness::new();
    let starts = harness.record(HookEvent::SessionStart);
    let packs = harness.record(HookEvent::BeforeContextPack);
    let ends = harness.record(HookEvent::SessionEnd);
    let agent = descriptor("solo", Arc::new(ScriptedAdapter::with_text("hi")));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let outcome = orchestrator
        .run_session(RunRequest::new(agent, "go").with_context("abc"))
        .await
        .unwrap();

    assert_eq!(starts.lock().unwrap().len(), 1);
    match &packs.lock().unwrap()[0] {
        HookPayload::BeforeContextPack(p) => assert_eq!(p.context_bytes, 3),
        other => panic!("unexpected payload: {other:?}"),
    }
    match &ends.lock().unwrap()[0] {
        HookPayload::SessionEnd(end) => {
            assert!(end.success);
            assert_eq!(end.session_id, outcome.session_id);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_eq!(outcome.root.final_message(), Some("hi"));
}

#[tokio::test]
async fn test_session_start_block_aborts() {
    let harness = Harness::new();
    harness.hooks.on_fn(HookEvent::SessionStart, |_| async {
        Ok(HookResponse::block("maintenance"))
    });
    let adapter = Arc::new(ScriptedAdapter::with_text("never"));
    let orchestrator = Orchestrator::new(harness.options(StaticCatalog::new()));

    let err = orchestrator
        .run_session(RunRequest::new(descriptor("solo", adapter.clone()), "go"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("maintenance"));
    assert_eq!(adapter.request_count(), 0);
}

#[tokio::test]
async fn test_agent_runner_delegates_through_hook_bus() {
    let harness = Harness::new();
    let helper = descriptor("helper", Arc::new(ScriptedAdapter::with_text("hello from helper")));
    let orchestrator = Arc::new(Orchestrator::new(
        harness.options(StaticCatalog::new().with_agent(helper)),
    ));

    assert!(orchestrator.install_agent_runner());
    assert!(!orchestrator.install_agent_runner());

    let reply = harness.hooks.run_agent("helper", "hi").await.unwrap();
    assert_eq!(reply, "hello from helper");

    let err = harness.hooks.run_agent("nobody", "hi").await.unwrap_err();
    assert!(err.to_string().contains("Unknown agent `nobody`"));
}

#[tokio::test]
async fn test_hook_delegated_run_appends_to_active_trace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.jsonl");
    let hooks: SharedHookBus = Arc::new(HookBus::new());

    let root = descriptor("root", Arc::new(ScriptedAdapter::with_text("root done")));
    let helper = descriptor("helper", Arc::new(ScriptedAdapter::with_text("helper done")));
    let catalog = StaticCatalog::new().with_agent(root.clone()).with_agent(helper);
    let options = RuntimeOptions::new(Arc::new(catalog), std::env::temp_dir())
        .with_hooks(hooks.clone())
        .with_trace_sink(Arc::new(JsonlTraceSink))
        .with_trace(path.clone(), false);
    let orchestrator = Arc::new(Orchestrator::new(options));
    assert!(orchestrator.install_agent_runner());

    let delegated = Arc::new(AtomicBool::new(false));
    let bus = hooks.clone();
    hooks.on_fn(HookEvent::Stop, move |_| {
        let bus = bus.clone();
        let delegated = delegated.clone();
        async move {
            if !delegated.swap(true, Ordering::SeqCst) {
                bus.run_agent("helper", "assist").await?;
            }
            Ok(HookResponse::Ack)
        }
    });

    orchestrator
        .run_agent(RunRequest::new(root, "go"))
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let records: Vec<TraceRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let first = &records[0];
    assert_eq!(first.phase, TracePhase::AgentStart);
    assert!(first.agent_id.starts_with("root-"));

    let helper_records = records.iter().filter(|r| r.agent_id.starts_with("helper-")).count();
    assert!(helper_records >= 2);
    let last = records.last().unwrap();
    assert_eq!(last.phase, TracePhase::AgentComplete);
    assert!(last.agent_id.starts_with("root-"));
}

#[tokio::test]
async fn test_compaction_keeps_prompt_after_history() {
    let harness = Harness::new();
    let adapter = scripted(vec![
        call("c1", "echo", json!({"text": "one"})),
        call("c2", "echo", json!({"text": "two"})),
        text("done"),
    ]);
    let options = harness
        .options(StaticCatalog::new())
        .with_compactor(Arc::new(WindowCompactor::new(4).with_keep_recent(2)));
    let orchestrator = Orchestrator::new(options);

    let invocation = orchestrator
        .run_agent(
            RunRequest::new(descriptor("solo", adapter), "next")
                .with_history(vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")]),
        )
        .await
        .unwrap();

    let messages = invocation.messages();
    assert_eq!(invocation.prompt_index(), Some(3));
    assert_eq!(messages[1].content, "earlier");
    assert_eq!(messages[3].content, "next");
    assert_eq!(messages.last().unwrap().content, "done");
    assert!(!messages.iter().any(|m| m.tool_call_id.as_deref() == Some("c1")));
}
