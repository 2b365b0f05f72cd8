//! Ollama native chat adapter (newline-delimited JSON).
//!
//! Ollama sends tool calls whole, already parsed, so no accumulation is
//! needed; ids are synthesised because the API does not assign any.

use arbor_types::{ChatMessage, Role, StreamEvent, Usage};
use reqwest::{Client, header};
use serde_json::{Value, json};

use crate::adapter::{
    AdapterConfig, EventStream, Normalizer, ProviderAdapter, StreamOptions, arguments_object,
    count, drive,
};
use crate::error::Result;
use crate::framing::Framing;

/// Default local Ollama URL.
pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

impl AdapterConfig {
    /// Config for a local Ollama server. Local inference gets a longer timeout.
    pub fn ollama() -> Self {
        AdapterConfig::new("ollama", DEFAULT_OLLAMA_BASE)
            .with_timeout(std::time::Duration::from_secs(600))
    }
}

pub struct OllamaAdapter {
    client: Client,
    config: AdapterConfig,
}

impl OllamaAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    fn request_body(&self, options: &StreamOptions) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": options.messages.iter().map(chat_message).collect::<Vec<_>>(),
            "stream": true,
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
            body["format"] = format.clone();
        }
        body
    }
}

impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn stream(&self, options: StreamOptions) -> EventStream {
        let mut builder = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.request_body(&options));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }
        drive(
            self.config.name.clone(),
            builder,
            Framing::Ndjson,
            ChunkNormalizer::default(),
            options.cancellation,
        )
    }
}

fn chat_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::Developer => Role::System,
        role => role,
    };
    let mut out = json!({"role": role.to_string(), "content": message.content});
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({"function": {"name": call.name, "arguments": arguments_object(&call.arguments)}})
            })
            .collect();
    }
    if let Some(name) = &message.name
        && message.role == Role::Tool
    {
        out["tool_name"] = json!(name);
    }
    out
}

#[derive(Default)]
struct ChunkNormalizer {
    in_reasoning: bool,
    calls_seen: usize,
}

impl Normalizer for ChunkNormalizer {
    fn normalize(&mut self, _event: Option<&str>, payload: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(error) = payload.get("error").and_then(Value::as_str) {
            events.push(StreamEvent::error(error));
            return events;
        }

        let message = &payload["message"];
        if let Some(thinking) = message.get("thinking").and_then(Value::as_str)
            && !thinking.is_empty()
        {
            self.in_reasoning = true;
            events.push(StreamEvent::reasoning(thinking));
        }
        if let Some(text) = message.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            events.extend(self.finish());
            events.push(StreamEvent::delta(text));
        }
        for call in message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            self.calls_seen += 1;
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", self.calls_seen));
            let function = &call["function"];
            events.push(StreamEvent::tool_call(
                id,
                function.get("name").and_then(Value::as_str).unwrap_or_default(),
                function.get("arguments").cloned().unwrap_or_else(|| json!({})),
            ));
        }

        if payload.get("done").and_then(Value::as_bool) == Some(true) {
            events.extend(self.finish());
            events.push(StreamEvent::End {
                reason: payload
                    .get("done_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                usage: Some(Usage::new(
                    count(payload, "prompt_eval_count"),
                    count(payload, "eval_count"),
                )),
                response_id: None,
            });
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.in_reasoning {
            self.in_reasoning = false;
            vec![StreamEvent::ReasoningEnd]
        } else {
            Vec::new()
        }
    }
}
