//! Anthropic Messages API adapter.

use std::collections::HashSet;

use arbor_types::{ChatMessage, Role, StreamEvent, Usage};
use reqwest::{Client, header};
use serde_json::{Value, json};

use crate::accumulator::ToolCallBuffer;
use crate::adapter::{
    AdapterConfig, EventStream, Normalizer, ProviderAdapter, StreamOptions, arguments_object,
    count, drive,
};
use crate::error::Result;
use crate::framing::Framing;

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const API_VERSION: &str = "2023-06-01";

impl AdapterConfig {
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        AdapterConfig::new("anthropic", DEFAULT_ANTHROPIC_BASE).with_api_key(api_key)
    }

    /// Config for the hosted Anthropic API using `ANTHROPIC_API_KEY`.
    pub fn anthropic_from_env() -> Result<Self> {
        AdapterConfig::new("anthropic", DEFAULT_ANTHROPIC_BASE)
            .with_api_key_from_env("ANTHROPIC_API_KEY")
    }
}

pub struct AnthropicAdapter {
    client: Client,
    config: AdapterConfig,
}

impl AnthropicAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    fn request_body(&self, options: &StreamOptions) -> Value {
        let (system, messages) = split_transcript(&options.messages);
        let mut body = json!({
            "model": options.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !options.tools.is_empty() {
            body["tools"] = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }
        if let Some(metadata) = &options.metadata {
            body["metadata"] = Value::Object(metadata.clone());
        }
        body
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn stream(&self, options: StreamOptions) -> EventStream {
        let mut builder = self
            .client
            .post(self.messages_url())
            .header(header::CONTENT_TYPE, "application/json")
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(&options));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header("x-api-key", api_key);
        }
        drive(
            self.config.name.clone(),
            builder,
            Framing::Sse,
            MessagesNormalizer::default(),
            options.cancellation,
        )
    }
}

/// Pull system/developer text out and fold the rest into alternating
/// user/assistant turns of content blocks. Consecutive tool results share
/// one user turn.
fn split_transcript(messages: &[ChatMessage]) -> (String, Vec<Value>) {
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in messages {
        let (role, blocks) = match message.role {
            Role::System | Role::Developer => {
                system.push(message.content.as_str());
                continue;
            }
            Role::User => ("user", vec![json!({"type": "text", "text": message.content})]),
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                })],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                blocks.extend(message.tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": arguments_object(&call.arguments),
                    })
                }));
                ("assistant", blocks)
            }
        };
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last, existing)) if *last == role => existing.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let turns = turns
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    (system.join("\n\n"), turns)
}

#[derive(Default)]
struct MessagesNormalizer {
    calls: ToolCallBuffer,
    thinking: HashSet<u64>,
    reason: Option<String>,
    usage: Usage,
    response_id: Option<String>,
}

impl Normalizer for MessagesNormalizer {
    fn normalize(&mut self, event: Option<&str>, payload: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .or(event)
            .unwrap_or_default();
        let index = payload.get("index").and_then(Value::as_u64).unwrap_or(0);
        let key = index.to_string();

        match kind {
            "message_start" => {
                let message = &payload["message"];
                self.response_id = message.get("id").and_then(Value::as_str).map(str::to_string);
                self.usage.input_tokens = count(&message["usage"], "input_tokens");
            }
            "content_block_start" => {
                let block = &payload["content_block"];
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => self.calls.start(
                        &key,
                        block.get("id").and_then(Value::as_str),
                        block.get("name").and_then(Value::as_str),
                    ),
                    Some("thinking") => {
                        self.thinking.insert(index);
                    }
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str)
                            && !text.is_empty()
                        {
                            events.push(StreamEvent::delta(text));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &payload["delta"];
                let field = |name: &str| delta.get(name).and_then(Value::as_str).unwrap_or_default();
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => events.push(StreamEvent::delta(field("text"))),
                    Some("thinking_delta") => {
                        events.push(StreamEvent::reasoning(field("thinking")))
                    }
                    Some("input_json_delta") => self.calls.append(&key, field("partial_json")),
                    _ => {}
                }
            }
            "content_block_stop" => {
                if self.calls.contains(&key) {
                    events.extend(self.calls.complete(&key));
                }
                if self.thinking.remove(&index) {
                    events.push(StreamEvent::ReasoningEnd);
                }
            }
            "message_delta" => {
                if let Some(reason) = payload["delta"].get("stop_reason").and_then(Value::as_str) {
                    self.reason = Some(reason.to_string());
                }
                if let Some(output) = payload["usage"].get("output_tokens").and_then(Value::as_u64) {
                    self.usage.output_tokens = output;
                }
            }
            "message_stop" => {
                events.extend(self.finish());
                events.push(StreamEvent::End {
                    reason: self.reason.take(),
                    usage: Some(self.usage),
                    response_id: self.response_id.take(),
                });
            }
            "error" => {
                let error = &payload["error"];
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider error");
                events.push(match error.get("type").and_then(Value::as_str) {
                    Some(kind) => StreamEvent::error_with_cause(message, kind),
                    None => StreamEvent::error(message),
                });
            }
            _ => {}
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.thinking.is_empty() {
            self.thinking.clear();
            events.push(StreamEvent::ReasoningEnd);
        }
        events.extend(self.calls.drain());
        events
    }
}
