//! Shell command tool.

use std::process::Stdio;
use std::time::Duration;

use arbor_types::ToolResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::time::timeout;

use crate::tool::{Tool, ToolContext, ToolError};

pub const SHELL_OUTPUT_SCHEMA: &str = "arbor://tools/shell/output";

/// Configuration for the shell tool.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Default timeout for commands.
    pub timeout: Duration,
    /// Commands rejected outright (substring match, case-insensitive).
    pub blocked_commands: Vec<String>,
    /// Maximum output size in bytes.
    pub max_output_size: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            blocked_commands: vec![
                "rm -rf /".to_string(),
                "mkfs".to_string(),
                ":(){ :|:& };:".to_string(),
            ],
            max_output_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Runs a command with `sh -c` after asking for confirmation.
#[derive(Debug, Clone, Default)]
pub struct ShellTool {
    config: ShellConfig,
}

impl ShellTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ShellConfig) -> Self {
        Self { config }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        !self
            .config
            .blocked_commands
            .iter()
            .any(|blocked| lower.contains(&blocked.to_lowercase()))
    }

    fn truncate_output(&self, output: String) -> String {
        let limit = self.config.max_output_size;
        if output.len() <= limit {
            return output;
        }
        let mut end = limit;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n\n[Output truncated at {} bytes]", &output[..end], limit)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory. The user is asked to approve every command."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to run with sh -c"
                },
                "timeout_secs": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Command timeout in seconds. Default: 30"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "$id": SHELL_OUTPUT_SCHEMA,
            "type": "object",
            "properties": {
                "exit_code": { "type": ["integer", "null"] },
                "success": { "type": "boolean" }
            },
            "required": ["exit_code", "success"]
        }))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args: ShellArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        if !self.is_command_allowed(&args.command) {
            return Err(ToolError::new(format!("Command not allowed: {}", args.command)));
        }
        if !ctx.confirm(&format!("Run `{}`?", args.command)).await {
            return Err(ToolError::new("User declined to run the command"));
        }

        let duration = args
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.cwd)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %args.command, cwd = %ctx.cwd.display(), "Running shell command");
        let output = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(ToolError::new("Operation cancelled")),
            result = timeout(duration, cmd.output()) => match result {
                Ok(output) => output.map_err(|e| ToolError::new(format!("Failed to execute command: {e}")))?,
                Err(_) => return Err(ToolError::new(format!("Command timed out after {duration:?}"))),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.into_owned();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n--- stderr ---\n");
            }
            text.push_str(&stderr);
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        let success = output.status.success();
        let exit_code = output.status.code();
        if !success {
            text = format!("Command failed with exit code {}\n{}", exit_code.unwrap_or(-1), text);
        }

        Ok(ToolResult::structured(
            SHELL_OUTPUT_SCHEMA,
            self.truncate_output(text),
            json!({ "exit_code": exit_code, "success": success }),
        ))
    }
}
