//! File reading tool.

use std::path::PathBuf;

use arbor_types::ToolResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;

use crate::tool::{Tool, ToolContext, ToolError};

pub const READ_FILE_OUTPUT_SCHEMA: &str = "arbor://tools/read_file/output";

/// Default cap on bytes returned.
const DEFAULT_MAX_BYTES: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    max_bytes: Option<usize>,
}

/// Reads a UTF-8 file relative to the context's working directory.
#[derive(Debug, Clone, Default)]
pub struct ReadFileTool {
    /// Optional base directory to restrict file access.
    base_dir: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict reads to `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve_path(&self, path: &str, ctx: &ToolContext) -> Result<PathBuf, ToolError> {
        let root = self.base_dir.as_ref().unwrap_or(&ctx.cwd);
        let candidate = root.join(path);
        if let Some(base) = &self.base_dir {
            let base = base.canonicalize()?;
            let resolved = candidate.canonicalize()?;
            if !resolved.starts_with(&base) {
                return Err(ToolError::new(format!(
                    "Path {} is outside the allowed directory",
                    candidate.display()
                )));
            }
            return Ok(resolved);
        }
        Ok(candidate)
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Relative paths resolve against the working directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "max_bytes": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of bytes to return. Default: 262144"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "$id": READ_FILE_OUTPUT_SCHEMA,
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "bytes": { "type": "integer", "minimum": 0 },
                "truncated": { "type": "boolean" }
            },
            "required": ["path", "bytes", "truncated"]
        }))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        if ctx.is_cancelled() {
            return Err(ToolError::new("Operation cancelled"));
        }
        let args: ReadFileArgs =
            serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let path = self.resolve_path(&args.path, ctx)?;

        if !path.is_file() {
            return Err(ToolError::new(format!("File not found: {}", path.display())));
        }
        let bytes = fs::read(&path).await?;
        let total = bytes.len();
        let limit = args.max_bytes.unwrap_or(DEFAULT_MAX_BYTES);
        let truncated = total > limit;
        let mut content = String::from_utf8_lossy(&bytes[..total.min(limit)]).into_owned();
        if truncated {
            content.push_str(&format!("\n\n[Output truncated at {limit} bytes]"));
        }

        Ok(ToolResult::structured(
            READ_FILE_OUTPUT_SCHEMA,
            content,
            json!({
                "path": path.display().to_string(),
                "bytes": total,
                "truncated": truncated
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;

    #[tokio::test]
    async fn test_read_relative_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new()).unwrap();
        let ctx = ToolContext::new(dir.path());
        let result = registry
            .execute("read_file", json!({"path": "notes.txt"}), &ctx)
            .await
            .unwrap();

        assert_eq!(result.content, "hello");
        assert_eq!(result.schema, READ_FILE_OUTPUT_SCHEMA);
        assert_eq!(result.data.unwrap()["bytes"], 5);
    }

    #[tokio::test]
    async fn test_read_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "abcdefgh").unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = ReadFileTool::new()
            .execute(json!({"path": "big.txt", "max_bytes": 3}), &ctx)
            .await
            .unwrap();
        assert!(result.content.starts_with("abc\n\n[Output truncated"));
        assert_eq!(result.data.unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn test_missing_file_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool::new()
            .execute(json!({"path": "nope.txt"}), &ToolContext::new(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("File not found"));
    }

    #[tokio::test]
    async fn test_base_dir_blocks_escape() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "x").unwrap();

        let err = ReadFileTool::with_base_dir(&inner)
            .execute(json!({"path": "../secret.txt"}), &ToolContext::new(&inner))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the allowed directory"));
    }
}
