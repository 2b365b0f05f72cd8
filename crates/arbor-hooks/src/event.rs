//! The closed set of lifecycle events and their typed payloads.
//!
//! Adding an event is additive; removing or renaming one breaks every hook
//! consumer.

use std::path::PathBuf;

use arbor_types::{ChatMessage, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A lifecycle event listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    BeforeContextPack,
    BeforeAgentStart,
    BeforeModelCall,
    /// Can veto the tool call.
    PreToolUse,
    PostToolUse,
    Notification,
    StreamError,
    /// A block skips the compaction.
    PreCompact,
    /// Listeners may return a continue response to force another turn.
    Stop,
    AfterAgentComplete,
    BeforeSpawnSubagent,
    SubagentStop,
    OnAgentError,
}

impl HookEvent {
    pub const ALL: [HookEvent; 15] = [
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::BeforeContextPack,
        HookEvent::BeforeAgentStart,
        HookEvent::BeforeModelCall,
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::Notification,
        HookEvent::StreamError,
        HookEvent::PreCompact,
        HookEvent::Stop,
        HookEvent::AfterAgentComplete,
        HookEvent::BeforeSpawnSubagent,
        HookEvent::SubagentStop,
        HookEvent::OnAgentError,
    ];

    /// Observational events: listener errors and blocks are logged and ignored.
    pub fn is_observational(self) -> bool {
        matches!(
            self,
            HookEvent::Notification
                | HookEvent::StreamError
                | HookEvent::SessionEnd
                | HookEvent::OnAgentError
        )
    }

    /// Events whose enclosing operation aborts when a listener blocks.
    pub fn aborts_on_block(self) -> bool {
        matches!(
            self,
            HookEvent::SessionStart
                | HookEvent::BeforeContextPack
                | HookEvent::BeforeSpawnSubagent
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::SessionStart => "sessionStart",
            HookEvent::SessionEnd => "sessionEnd",
            HookEvent::BeforeContextPack => "beforeContextPack",
            HookEvent::BeforeAgentStart => "beforeAgentStart",
            HookEvent::BeforeModelCall => "beforeModelCall",
            HookEvent::PreToolUse => "preToolUse",
            HookEvent::PostToolUse => "postToolUse",
            HookEvent::Notification => "notification",
            HookEvent::StreamError => "streamError",
            HookEvent::PreCompact => "preCompact",
            HookEvent::Stop => "stop",
            HookEvent::AfterAgentComplete => "afterAgentComplete",
            HookEvent::BeforeSpawnSubagent => "beforeSpawnSubagent",
            HookEvent::SubagentStop => "subagentStop",
            HookEvent::OnAgentError => "onAgentError",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SessionStart {
    pub session_id: String,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {
    pub session_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeContextPack {
    pub session_id: String,
    pub agent: String,
    pub cwd: PathBuf,
    pub context_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeAgentStart {
    pub id: String,
    pub parent_id: Option<String>,
    pub depth: usize,
    pub is_root: bool,
    pub tools: Vec<String>,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeModelCall {
    pub agent_id: String,
    pub iteration: u32,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreToolUse {
    pub agent_id: String,
    pub tool: String,
    pub tool_call_id: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostToolUse {
    pub agent_id: String,
    pub tool: String,
    pub tool_call_id: String,
    pub result: ToolResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub agent_id: String,
    pub payload: Value,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamError {
    pub agent_id: String,
    pub message: String,
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreCompact {
    pub agent_id: String,
    pub message_count: usize,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stop {
    pub agent_id: String,
    pub iterations: u32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AfterAgentComplete {
    pub agent_id: String,
    pub iterations: u32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeSpawnSubagent {
    pub parent_id: String,
    pub child_id: String,
    pub agent: String,
    pub depth: usize,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubagentStop {
    pub parent_id: String,
    pub child_id: String,
    pub agent: String,
    pub iterations: u32,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnAgentError {
    pub agent_id: String,
    pub message: String,
    /// Rendered error source chain, outermost first.
    pub stack: Vec<String>,
    pub cause: Option<String>,
}

/// A dispatched event together with its payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum HookPayload {
    SessionStart(SessionStart),
    SessionEnd(SessionEnd),
    BeforeContextPack(BeforeContextPack),
    BeforeAgentStart(BeforeAgentStart),
    BeforeModelCall(BeforeModelCall),
    PreToolUse(PreToolUse),
    PostToolUse(PostToolUse),
    Notification(Notification),
    StreamError(StreamError),
    PreCompact(PreCompact),
    Stop(Stop),
    AfterAgentComplete(AfterAgentComplete),
    BeforeSpawnSubagent(BeforeSpawnSubagent),
    SubagentStop(SubagentStop),
    OnAgentError(OnAgentError),
}

impl HookPayload {
    /// The event key this payload is dispatched under.
    pub fn event(&self) -> HookEvent {
        match self {
            HookPayload::SessionStart(_) => HookEvent::SessionStart,
            HookPayload::SessionEnd(_) => HookEvent::SessionEnd,
            HookPayload::BeforeContextPack(_) => HookEvent::BeforeContextPack,
            HookPayload::BeforeAgentStart(_) => HookEvent::BeforeAgentStart,
            HookPayload::BeforeModelCall(_) => HookEvent::BeforeModelCall,
            HookPayload::PreToolUse(_) => HookEvent::PreToolUse,
            HookPayload::PostToolUse(_) => HookEvent::PostToolUse,
            HookPayload::Notification(_) => HookEvent::Notification,
            HookPayload::StreamError(_) => HookEvent::StreamError,
            HookPayload::PreCompact(_) => HookEvent::PreCompact,
            HookPayload::Stop(_) => HookEvent::Stop,
            HookPayload::AfterAgentComplete(_) => HookEvent::AfterAgentComplete,
            HookPayload::BeforeSpawnSubagent(_) => HookEvent::BeforeSpawnSubagent,
            HookPayload::SubagentStop(_) => HookEvent::SubagentStop,
            HookPayload::OnAgentError(_) => HookEvent::OnAgentError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for event in HookEvent::ALL {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json, Value::String(event.to_string()));
        }
    }

    #[test]
    fn test_classes_are_disjoint() {
        for event in HookEvent::ALL {
            assert!(!(event.is_observational() && event.aborts_on_block()), "{event}");
        }
        assert!(!HookEvent::PreToolUse.is_observational());
        assert!(!HookEvent::PreToolUse.aborts_on_block());
        assert!(!HookEvent::BeforeAgentStart.aborts_on_block());
        assert!(HookEvent::BeforeSpawnSubagent.aborts_on_block());
    }

    #[test]
    fn test_payload_serializes_with_event_tag() {
        let payload = HookPayload::PreCompact(PreCompact {
            agent_id: "a".to_string(),
            message_count: 4,
            reason: None,
        });
        assert_eq!(payload.event(), HookEvent::PreCompact);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "preCompact");
        assert_eq!(json["payload"]["message_count"], 4);
    }
}
