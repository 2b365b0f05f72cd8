//! Agent orchestration for Arbor.
//!
//! An [`Orchestrator`] runs agents from a [`Catalog`] against provider
//! adapters. Each run is an [`AgentInvocation`]: a transcript, counters and
//! the children it spawned through the `spawn_subagent` tool.
//!
//! ```text
//! RunRequest ─► Orchestrator ─► ProviderAdapter::stream ─► StreamEvents
//!                    │                                        │
//!                    ├─► ToolRegistry (validate, run, check) ◄┘
//!                    ├─► HookBus (lifecycle events)
//!                    ├─► StreamRenderer / TraceSink
//!                    └─► child invocations (recursive)
//! ```

pub mod catalog;
pub mod compaction;
pub mod error;
pub mod invocation;
pub mod orchestrator;
pub mod prompt;
pub mod render;
pub mod tool;
pub mod tools;
pub mod trace;
pub mod validation;

pub use catalog::{AgentDefinition, AgentRuntimeDescriptor, Catalog, SharedCatalog, StaticCatalog};
pub use compaction::{
    CompactionOutcome, CompactionPlan, SummarizingCompactor, TranscriptCompactor, WindowCompactor,
};
pub use error::{AgentError, Result};
pub use invocation::{AgentInvocation, InvocationId, InvocationState, ParentLink, collect_invocations};
pub use orchestrator::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_ITERATIONS, LoopConfig, Orchestrator, RunRequest, RuntimeOptions,
    SessionOutcome, SpawnRequest,
};
pub use prompt::{DefaultTemplateRenderer, PromptContext, TemplateRenderer};
pub use render::{CollectingRenderer, NullRenderer, StreamRenderer};
pub use tool::{
    AutoConfirm, Confirm, FnTool, Tool, ToolContext, ToolError, ToolRegistry, coerce_arguments,
    synthesized_output_id,
};
pub use tools::{
    READ_FILE_OUTPUT_SCHEMA, ReadFileTool, SHELL_OUTPUT_SCHEMA, SPAWN_SUBAGENT_TOOL,
    SUBAGENT_RESULT_SCHEMA, ShellConfig, ShellTool, SpawnArgs, builtin_registry,
};
pub use trace::{JsonlTraceSink, MemoryTraceSink, TracePhase, TraceRecord, TraceSink};
pub use validation::{CompiledSchema, IssueKind, SchemaIssue, ValidationError, format_issues};

// Re-export the shared vocabulary so embedders need one import.
pub use arbor_types::{AgentEvent, ChatMessage, Role, StreamErrorPolicy, StreamEvent, ToolResult, Usage};
