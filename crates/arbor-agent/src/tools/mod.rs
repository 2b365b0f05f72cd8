//! Built-in tools.

mod file;
mod shell;
mod spawn;

pub use file::{READ_FILE_OUTPUT_SCHEMA, ReadFileTool};
pub use shell::{SHELL_OUTPUT_SCHEMA, ShellConfig, ShellTool};
pub use spawn::{SPAWN_SUBAGENT_TOOL, SUBAGENT_RESULT_SCHEMA, SpawnArgs};
pub(crate) use spawn::{spawn_parameters, spawn_spec};

use crate::error::Result;
use crate::tool::ToolRegistry;

/// A registry holding every built-in tool.
pub fn builtin_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool::new())?;
    registry.register(ShellTool::new())?;
    Ok(registry)
}
