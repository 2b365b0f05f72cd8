//! OpenAI Chat Completions adapter.
//!
//! Also serves any OpenAI-compatible endpoint (Groq, vLLM, LM Studio,
//! Ollama's `/v1` shim).

use std::collections::HashMap;

use arbor_types::{ChatMessage, Role, StreamEvent, Usage};
use reqwest::{Client, header};
use serde_json::{Value, json};

use crate::accumulator::ToolCallBuffer;
use crate::adapter::{
    AdapterConfig, EventStream, Normalizer, ProviderAdapter, StreamOptions, arguments_string,
    count, drive,
};
use crate::error::Result;
use crate::framing::Framing;

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

impl AdapterConfig {
    /// Config for the hosted OpenAI API.
    pub fn openai(api_key: impl Into<String>) -> Self {
        AdapterConfig::new("openai", DEFAULT_OPENAI_BASE).with_api_key(api_key)
    }

    /// Config for the hosted OpenAI API using `OPENAI_API_KEY`.
    pub fn openai_from_env() -> Result<Self> {
        AdapterConfig::new("openai", DEFAULT_OPENAI_BASE).with_api_key_from_env("OPENAI_API_KEY")
    }
}

/// OpenAI-compatible chat completions adapter.
pub struct OpenAiAdapter {
    client: Client,
    config: AdapterConfig,
}

impl OpenAiAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn request_body(&self, options: &StreamOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": options.messages.iter().map(chat_message).collect::<Vec<_>>(),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !options.tools.is_empty() {
            body["tools"] = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        if let Some(format) = &options.response_format {
            body["response_format"] = format.clone();
        }
        if let Some(metadata) = &options.metadata {
            body["metadata"] = Value::Object(metadata.clone());
        }
        body
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn stream(&self, options: StreamOptions) -> EventStream {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.request_body(&options));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }
        drive(
            self.config.name.clone(),
            builder,
            Framing::Sse,
            ChatNormalizer::default(),
            options.cancellation,
        )
    }
}

fn chat_message(message: &ChatMessage) -> Value {
    let mut out = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if let Some(name) = &message.name {
        out["name"] = json!(name);
    }
    if let Some(id) = &message.tool_call_id {
        out["tool_call_id"] = json!(id);
    }
    if message.role == Role::Assistant && !message.tool_calls.is_empty() {
        out["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": arguments_string(&call.arguments)},
                })
            })
            .collect();
        if message.content.is_empty() {
            out["content"] = Value::Null;
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk normalisation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChatNormalizer {
    calls: ToolCallBuffer,
    in_reasoning: bool,
    reason: Option<String>,
    usage: Option<Usage>,
    response_id: Option<String>,
    // Provider index -> buffer key of the call currently open at that index
    open: HashMap<u64, String>,
}

impl ChatNormalizer {
    fn close_reasoning(&mut self, events: &mut Vec<StreamEvent>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            events.push(StreamEvent::ReasoningEnd);
        }
    }
}

impl Normalizer for ChatNormalizer {
    fn normalize(&mut self, _event: Option<&str>, payload: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(StreamEvent::error(message));
            return events;
        }
        if let Some(id) = payload.get("id").and_then(Value::as_str) {
            self.response_id = Some(id.to_string());
        }
        if let Some(usage) = payload.get("usage").filter(|u| u.is_object()) {
            self.usage = Some(Usage::new(
                count(usage, "prompt_tokens"),
                count(usage, "completion_tokens"),
            ));
        }

        let choices = payload
            .get("choices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for choice in choices {
            let delta = &choice["delta"];

            let reasoning = delta
                .get("reasoning_content")
                .or_else(|| delta.get("reasoning"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            if let Some(text) = reasoning {
                self.in_reasoning = true;
                events.push(StreamEvent::reasoning(text));
            }

            if let Some(text) = delta.get("content").and_then(Value::as_str)
                && !text.is_empty()
            {
                self.close_reasoning(&mut events);
                events.push(StreamEvent::delta(text));
            }

            for call in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let id = call.get("id").and_then(Value::as_str);
                // A new id at an index means a new call there
                let key = match (id, self.open.get(&index)) {
                    (Some(id), _) => id.to_string(),
                    (None, Some(key)) => key.clone(),
                    (None, None) => format!("{index}"),
                };
                self.open.insert(index, key.clone());
                let function = &call["function"];
                self.calls
                    .start(&key, id, function.get("name").and_then(Value::as_str));
                if let Some(fragment) = function.get("arguments").and_then(Value::as_str) {
                    self.calls.append(&key, fragment);
                }
            }

            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.close_reasoning(&mut events);
                self.reason = Some(reason.to_string());
                self.open.clear();
                events.extend(self.calls.drain());
            }
        }
        events
    }

    fn done(&mut self) -> Vec<StreamEvent> {
        let mut events = self.finish();
        events.push(StreamEvent::End {
            reason: self.reason.take(),
            usage: self.usage.take(),
            response_id: self.response_id.take(),
        });
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_reasoning(&mut events);
        events.extend(self.calls.drain());
        events
    }
}
