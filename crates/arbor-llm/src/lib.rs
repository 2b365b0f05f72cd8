//! Streaming protocol adapters for Arbor.
//!
//! Every model backend is wrapped in a [`ProviderAdapter`] that decodes the
//! provider's wire format into the canonical [`StreamEvent`] union.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ProviderAdapter::stream() -> Stream<Event>  │
//! └──────────────────────────────────────────────┘
//!                      │
//!     ┌──────────┬─────┴──────┬───────────┐
//!     ▼          ▼            ▼           ▼
//! ┌────────┐ ┌─────────┐ ┌─────────┐ ┌────────┐
//! │ OpenAI │ │Responses│ │Anthropic│ │ Ollama │
//! └────────┘ └─────────┘ └─────────┘ └────────┘
//!   SSE        SSE         SSE         NDJSON
//! ```

mod accumulator;
pub mod adapter;
pub mod error;
pub mod framing;
pub mod notifications;

// Provider implementations
pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod responses;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use adapter::{
    AdapterConfig, DEFAULT_TIMEOUT_SECS, EventStream, ProviderAdapter, SharedAdapter,
    StreamOptions, ToolSpec,
};
pub use arbor_types::StreamEvent;
pub use error::{LlmError, Result};
pub use framing::{Frame, FrameDecoder, Framing};
pub use notifications::extract_notifications;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use responses::ResponsesAdapter;

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedAdapter;
