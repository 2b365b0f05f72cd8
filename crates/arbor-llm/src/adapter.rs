//! Provider adapter abstraction.
//!
//! A [`ProviderAdapter`] turns one model call into a lazy stream of canonical
//! [`StreamEvent`]s. The stream is not restartable: retrying means issuing a
//! fresh call. Adapters never fail the stream itself; transport and protocol
//! problems are yielded as `error` events.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arbor_types::{ChatMessage, StreamEvent};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, Result};
use crate::framing::{FrameDecoder, Framing};
use crate::notifications::extract_notifications;

/// Stream of canonical events for one model call.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// Shared adapter handle.
pub type SharedAdapter = Arc<dyn ProviderAdapter>;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

/// Everything one model call needs.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub response_format: Option<Value>,
    pub metadata: Option<Map<String, Value>>,
    pub previous_response_id: Option<String>,
    pub cancellation: CancellationToken,
}

impl StreamOptions {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// One model backend.
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for logging and tracing.
    fn name(&self) -> &str;

    /// Open a streaming call. The request is issued on first poll.
    fn stream(&self, options: StreamOptions) -> EventStream;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings shared by the HTTP adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Name for this adapter instance.
    pub name: String,
    /// Base URL for the API (no trailing slash).
    pub base_url: String,
    /// API key (optional for local services like Ollama).
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Output token cap, for providers that require one.
    pub max_tokens: u32,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_tokens: 8192,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Read the API key from `var`.
    pub fn with_api_key_from_env(self, var: &str) -> Result<Self> {
        let key = std::env::var(var)
            .map_err(|_| LlmError::Config(format!("{} environment variable not set", var)))?;
        Ok(self.with_api_key(key))
    }

    pub(crate) fn build_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared stream driver
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-specific translation of decoded records.
pub(crate) trait Normalizer: Send + 'static {
    /// Translate one decoded record into canonical events.
    fn normalize(&mut self, event: Option<&str>, payload: &Value) -> Vec<StreamEvent>;

    /// Called on the `[DONE]` sentinel. Must end with an `end` event.
    fn done(&mut self) -> Vec<StreamEvent> {
        let mut events = self.finish();
        events.push(StreamEvent::end("done"));
        events
    }

    /// Called when the body ends without a completion marker.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Send `request` and decode its body into canonical events.
///
/// The generator stops right after yielding an `end` event.
pub(crate) fn drive<N: Normalizer>(
    provider: String,
    request: reqwest::RequestBuilder,
    framing: Framing,
    mut normalizer: N,
    cancel: CancellationToken,
) -> EventStream {
    Box::pin(async_stream::stream! {
        let sent = tokio::select! {
            _ = cancel.cancelled() => None,
            result = request.send() => Some(result),
        };
        let response = match sent {
            None => {
                yield StreamEvent::error("request cancelled");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(provider = %provider, error = %e, "Model request failed");
                yield StreamEvent::error_with_cause(format!("{} request failed", provider), e.to_string());
                return;
            }
            Some(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = %provider, status = %status, "Model request rejected");
            yield StreamEvent::error_with_cause(
                format!("{} request failed with status {}", provider, status),
                body,
            );
            return;
        }

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new(framing);
        let mut received = false;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            let chunk = match next {
                None => {
                    yield StreamEvent::error("request cancelled");
                    return;
                }
                Some(None) => break,
                Some(Some(Err(e))) => {
                    yield StreamEvent::error_with_cause("stream read failed", e.to_string());
                    return;
                }
                Some(Some(Ok(chunk))) => chunk,
            };
            if !chunk.is_empty() {
                received = true;
            }
            for frame in decoder.push(&chunk) {
                let events = translate(&mut normalizer, frame.event.as_deref(), &frame.data, frame.is_done_marker());
                for event in events {
                    let last = event.is_end();
                    yield event;
                    if last {
                        return;
                    }
                }
            }
        }

        if !received {
            yield StreamEvent::error(format!("{} returned an empty response body", provider));
            return;
        }
        for frame in decoder.finish() {
            let events = translate(&mut normalizer, frame.event.as_deref(), &frame.data, frame.is_done_marker());
            for event in events {
                let last = event.is_end();
                yield event;
                if last {
                    return;
                }
            }
        }
        for event in normalizer.finish() {
            yield event;
        }
    })
}

fn translate<N: Normalizer>(
    normalizer: &mut N,
    event: Option<&str>,
    data: &str,
    done: bool,
) -> Vec<StreamEvent> {
    if done {
        return normalizer.done();
    }
    match serde_json::from_str::<Value>(data) {
        Ok(payload) => {
            let mut events = extract_notifications(&payload);
            events.extend(normalizer.normalize(event, &payload));
            events
        }
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable stream record");
            vec![StreamEvent::error_with_cause(
                "failed to decode stream record",
                e.to_string(),
            )]
        }
    }
}

/// Tool call arguments as the string form most providers expect.
pub(crate) fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tool call arguments as an object, for providers that want structured input.
pub(crate) fn arguments_object(arguments: &Value) -> Value {
    match arguments {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())),
        Value::Object(_) => arguments.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Read a usage count that may be absent.
pub(crate) fn count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}
