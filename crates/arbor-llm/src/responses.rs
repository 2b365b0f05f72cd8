//! OpenAI Responses API adapter.
//!
//! Unlike chat completions, the Responses API keeps conversation state
//! server-side: when `previous_response_id` is set only the turns after the
//! last assistant message are sent.

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

pub struct ResponsesAdapter {
    client: Client,
    config: AdapterConfig,
}

impl ResponsesAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.config.base_url)
    }

    fn request_body(&self, options: &StreamOptions) -> Value {
        let messages = match options.previous_response_id {
            Some(_) => since_last_assistant(&options.messages),
            None => &options.messages[..],
        };
        let mut body = json!({
            "model": options.model,
            "input": messages.iter().flat_map(input_items).collect::<Vec<_>>(),
            "stream": true,
        });
        if let Some(id) = &options.previous_response_id {
            body["previous_response_id"] = json!(id);
        }
        if !options.tools.is_empty() {
            body["tools"] = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
        }
        if let Some(format) = &options.response_format {
            body["text"] = json!({ "format": format });
        }
        if let Some(metadata) = &options.metadata {
            body["metadata"] = Value::Object(metadata.clone());
        }
        body
    }
}

impl ProviderAdapter for ResponsesAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn stream(&self, options: StreamOptions) -> EventStream {
        let mut builder = self
            .client
            .post(self.responses_url())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.request_body(&options));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }
        drive(
            self.config.name.clone(),
            builder,
            Framing::Sse,
            ResponsesNormalizer::default(),
            options.cancellation,
        )
    }
}

fn since_last_assistant(messages: &[ChatMessage]) -> &[ChatMessage] {
    match messages.iter().rposition(ChatMessage::is_assistant) {
        Some(pos) => &messages[pos + 1..],
        None => messages,
    }
}

fn input_items(message: &ChatMessage) -> Vec<Value> {
    match message.role {
        Role::Tool => vec![json!({
            "type": "function_call_output",
            "call_id": message.tool_call_id.clone().unwrap_or_default(),
            "output": message.content,
        })],
        Role::Assistant => {
            let mut items = Vec::new();
            if !message.content.is_empty() {
                items.push(json!({"role": "assistant", "content": message.content}));
            }
            items.extend(message.tool_calls.iter().map(|call| {
                json!({
                    "type": "function_call",
                    "call_id": call.id,
                    "name": call.name,
                    "arguments": arguments_string(&call.arguments),
                })
            }));
            items
        }
        role => vec![json!({"role": role.to_string(), "content": message.content})],
    }
}

#[derive(Default)]
struct ResponsesNormalizer {
    calls: ToolCallBuffer,
    in_reasoning: bool,
    response_id: Option<String>,
}

impl ResponsesNormalizer {
    fn close_reasoning(&mut self, events: &mut Vec<StreamEvent>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            events.push(StreamEvent::ReasoningEnd);
        }
    }

    fn end(&mut self, response: &Value, events: &mut Vec<StreamEvent>) {
        self.close_reasoning(events);
        events.extend(self.calls.drain());
        let usage = response
            .get("usage")
            .filter(|u| u.is_object())
            .map(|u| Usage::new(count(u, "input_tokens"), count(u, "output_tokens")));
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.response_id.take());
        events.push(StreamEvent::End {
            reason: response
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            usage,
            response_id: id,
        });
    }
}

impl Normalizer for ResponsesNormalizer {
    fn normalize(&mut self, event: Option<&str>, payload: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .or(event)
            .unwrap_or_default();
        let text = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or_default();

        match kind {
            "response.created" | "response.in_progress" => {
                if let Some(id) = payload["response"].get("id").and_then(Value::as_str) {
                    self.response_id = Some(id.to_string());
                }
            }
            "response.output_text.delta" => {
                self.close_reasoning(&mut events);
                events.push(StreamEvent::delta(text("delta")));
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                self.in_reasoning = true;
                events.push(StreamEvent::reasoning(text("delta")));
            }
            "response.reasoning_summary_text.done" | "response.reasoning_text.done" => {
                self.close_reasoning(&mut events);
            }
            "response.output_item.added" => {
                let item = &payload["item"];
                if item["type"] == "function_call"
                    && let Some(key) = item.get("id").and_then(Value::as_str)
                {
                    self.calls.start(
                        key,
                        item.get("call_id").and_then(Value::as_str),
                        item.get("name").and_then(Value::as_str),
                    );
                }
            }
            "response.function_call_arguments.delta" => {
                self.calls.append(text("item_id"), text("delta"));
            }
            "response.output_item.done" => {
                let item = &payload["item"];
                if item["type"] == "function_call"
                    && let Some(key) = item.get("id").and_then(Value::as_str)
                {
                    if let Some(arguments) = item.get("arguments").and_then(Value::as_str) {
                        self.calls.set_arguments(key, arguments);
                    }
                    events.extend(self.calls.complete(key));
                }
            }
            "response.completed" | "response.incomplete" => {
                self.end(&payload["response"], &mut events);
            }
            "response.failed" => {
                let response = &payload["response"];
                let message = response["error"]
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("response failed");
                events.push(StreamEvent::error(message));
                self.end(response, &mut events);
            }
            "error" => {
                events.push(StreamEvent::error(
                    payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("provider error"),
                ));
            }
            _ => {}
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.close_reasoning(&mut events);
        events.extend(self.calls.drain());
        events
    }
}
