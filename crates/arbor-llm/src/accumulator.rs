//! Per-call tool argument accumulation.
//!
//! Providers stream function-call arguments as fragments. Fragments are
//! buffered per call key and only released as one `tool_call` event once the
//! provider signals that call is complete.

use std::collections::HashMap;

use arbor_types::StreamEvent;
use serde_json::Value;

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub(crate) struct ToolCallBuffer {
    pending: HashMap<String, PendingCall>,
    order: Vec<String>,
}

impl ToolCallBuffer {
    /// Open (or update) the call buffered under `key`. The id and name are
    /// only taken the first time they are seen.
    pub fn start(&mut self, key: &str, id: Option<&str>, name: Option<&str>) {
        if !self.pending.contains_key(key) {
            self.order.push(key.to_string());
        }
        let call = self.pending.entry(key.to_string()).or_default();
        if call.id.is_none() {
            call.id = id.filter(|id| !id.is_empty()).map(str::to_string);
        }
        if call.name.is_empty()
            && let Some(name) = name
        {
            call.name = name.to_string();
        }
    }

    pub fn append(&mut self, key: &str, fragment: &str) {
        match self.pending.get_mut(key) {
            Some(call) => call.arguments.push_str(fragment),
            None => tracing::debug!(key, "Dropping argument fragment for unknown tool call"),
        }
    }

    /// Replace the buffered arguments with the provider's final value.
    pub fn set_arguments(&mut self, key: &str, arguments: &str) {
        if let Some(call) = self.pending.get_mut(key) {
            call.arguments = arguments.to_string();
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Release the call buffered under `key`.
    pub fn complete(&mut self, key: &str) -> Option<StreamEvent> {
        let call = self.pending.remove(key)?;
        self.order.retain(|k| k != key);
        Some(into_event(key, call))
    }

    /// Release every buffered call in the order they were opened.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|call| into_event(&key, call)))
            .collect()
    }
}

fn into_event(key: &str, call: PendingCall) -> StreamEvent {
    let arguments = if call.arguments.trim().is_empty() {
        "{}".to_string()
    } else {
        call.arguments
    };
    let id = call.id.unwrap_or_else(|| format!("call_{key}"));
    StreamEvent::tool_call(id, call.name, Value::String(arguments))
}
