//! Tool result envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema identifier used by tools that return unstructured text only.
pub const PLAIN_RESULT_SCHEMA: &str = "arbor://tool-result/text";

/// The envelope every tool handler returns.
///
/// `schema` names the output schema `data` conforms to. Tools that declare an
/// output schema must echo its `$id` here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub schema: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ToolResult {
    /// A plain text result with no structured payload.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            schema: PLAIN_RESULT_SCHEMA.to_string(),
            content: content.into(),
            data: None,
            metadata: None,
        }
    }

    /// A structured result conforming to the output schema `schema`.
    pub fn structured(schema: impl Into<String>, content: impl Into<String>, data: Value) -> Self {
        Self {
            schema: schema.into(),
            content: content.into(),
            data: Some(data),
            metadata: None,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}
