//! Listener responses and dispatch outcomes.

use arbor_types::ChatMessage;
use serde_json::Value;
use thiserror::Error;

use crate::event::HookEvent;

/// What a listener hands back to the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum HookResponse {
    /// Nothing to report.
    Ack,
    /// An opaque value for the emitter.
    Value(Value),
    /// Stop dispatch and veto the operation, where the event allows it.
    Block { reason: Option<String> },
    /// `stop` only: keep the agent running with these messages appended.
    Continue { enqueue: Vec<ChatMessage> },
}

impl HookResponse {
    pub fn block(reason: impl Into<String>) -> Self {
        HookResponse::Block {
            reason: Some(reason.into()),
        }
    }

    pub fn continue_with(enqueue: Vec<ChatMessage>) -> Self {
        HookResponse::Continue { enqueue }
    }
}

/// Error raised by a listener.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The listener that blocked a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocked {
    pub reason: Option<String>,
    /// Registration index of the blocking listener.
    pub listener: usize,
}

/// Outcome of one `emit`. Callers must inspect it; listener errors are
/// reported here, never raised.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Responses of the listeners that ran before dispatch stopped.
    pub results: Vec<HookResponse>,
    pub blocked: Option<Blocked>,
    pub error: Option<HookError>,
}

impl DispatchResult {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.blocked.as_ref().and_then(|b| b.reason.as_deref())
    }

    /// Every message enqueued by continue responses, in listener order.
    pub fn enqueued(&self) -> Vec<ChatMessage> {
        self.results
            .iter()
            .filter_map(|r| match r {
                HookResponse::Continue { enqueue } => Some(enqueue.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// A dispatch the enclosing operation cannot proceed past.
#[derive(Debug, Clone, Error)]
pub enum HookFailure {
    #[error("{event} hook failed: {source}")]
    Listener {
        event: HookEvent,
        #[source]
        source: HookError,
    },

    #[error("{event} blocked: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Blocked {
        event: HookEvent,
        reason: Option<String>,
    },
}

impl HookFailure {
    pub fn event(&self) -> HookEvent {
        match self {
            HookFailure::Listener { event, .. } | HookFailure::Blocked { event, .. } => *event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueued_flattens_continue_responses() {
        let result = DispatchResult {
            results: vec![
                HookResponse::Ack,
                HookResponse::continue_with(vec![ChatMessage::user("a")]),
                HookResponse::Value(Value::Null),
                HookResponse::continue_with(vec![ChatMessage::user("b"), ChatMessage::user("c")]),
            ],
            ..Default::default()
        };
        let contents: Vec<_> = result.enqueued().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_messages() {
        let failure = HookFailure::Listener {
            event: HookEvent::PreToolUse,
            source: HookError::new("pre-hook failure"),
        };
        assert_eq!(failure.to_string(), "preToolUse hook failed: pre-hook failure");

        let failure = HookFailure::Blocked {
            event: HookEvent::SessionStart,
            reason: None,
        };
        assert_eq!(failure.to_string(), "sessionStart blocked: no reason given");
        assert_eq!(failure.event(), HookEvent::SessionStart);
    }
}
