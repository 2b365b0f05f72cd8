//! Shared types for the Arbor agent runtime.
//!
//! Everything that crosses a crate boundary lives here: the transcript
//! message model, the canonical stream event union produced by protocol
//! adapters, and the tool result envelope.

pub mod event;
pub mod message;
pub mod tool;

pub use event::{AgentEvent, StreamErrorPolicy, StreamEvent, ToolCallEvent, Usage};
pub use message::{ChatMessage, Role, ToolCallRecord};
pub use tool::{PLAIN_RESULT_SCHEMA, ToolResult};
