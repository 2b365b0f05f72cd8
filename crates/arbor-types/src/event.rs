//! Canonical stream events.
//!
//! Every protocol adapter decodes its provider's wire format into
//! [`StreamEvent`]. No other representation crosses the adapter boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::ToolResult;

/// Token accounting reported by a provider at the end of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Add another usage report to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A fully accumulated tool call.
///
/// `arguments` is whatever the provider sent once complete: usually a JSON
/// string, sometimes an already parsed object. The tool registry coerces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallEvent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments,
        }
    }
}

/// The canonical event union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text.
    Delta { text: String },
    /// Reasoning text.
    ReasoningDelta { text: String },
    /// The current reasoning segment finished.
    ReasoningEnd,
    /// A complete tool call. Partial arguments never surface.
    ToolCall(ToolCallEvent),
    /// A tool result produced outside the model call (provider-side tools,
    /// subagent completions).
    ToolResult { name: String, result: ToolResult },
    /// Side-channel notification.
    Notification {
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// Non-fatal stream error.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    /// Terminal event. Nothing follows it.
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        StreamEvent::ReasoningDelta { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        StreamEvent::ToolCall(ToolCallEvent::new(id, name, arguments))
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn error_with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn notification(payload: Value, metadata: Option<Map<String, Value>>) -> Self {
        StreamEvent::Notification { payload, metadata }
    }

    /// An `end` event with only a reason.
    pub fn end(reason: impl Into<String>) -> Self {
        StreamEvent::End {
            reason: Some(reason.into()),
            usage: None,
            response_id: None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamEvent::End { .. })
    }

    /// Event name as it appears on the wire (`delta`, `tool_call`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::ReasoningDelta { .. } => "reasoning_delta",
            StreamEvent::ReasoningEnd => "reasoning_end",
            StreamEvent::ToolCall(_) => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Notification { .. } => "notification",
            StreamEvent::Error { .. } => "error",
            StreamEvent::End { .. } => "end",
        }
    }
}

/// A stream event attributed to the invocation that produced it, so one
/// renderer can multiplex a whole agent tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

impl AgentEvent {
    pub fn new(agent_id: impl Into<String>, event: StreamEvent) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            event,
        }
    }
}

/// What the orchestrator does with an `error` event that arrives without `end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorPolicy {
    /// Report it and keep consuming the stream.
    #[default]
    Continue,
    /// Report it and close the current model call.
    EndIteration,
    /// Fail the invocation.
    Fail,
}
