//! Prompt rendering.
//!
//! Templates use `{{ name }}` placeholders. Values come from, in increasing
//! precedence: the definition's variables, the request's variables, and the
//! built-ins `agent_id`, `prompt` and `context`.

use std::collections::HashMap;
use std::sync::LazyLock;

use arbor_types::ChatMessage;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::catalog::AgentDefinition;
use crate::error::{AgentError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("valid placeholder pattern")
});

/// Everything a template can draw on.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub definition: &'a AgentDefinition,
    pub agent_id: &'a str,
    pub prompt: &'a str,
    pub context: &'a str,
    pub history: &'a [ChatMessage],
    pub variables: &'a HashMap<String, Value>,
}

/// Produces the system and user prompts for an invocation.
pub trait TemplateRenderer: Send + Sync {
    fn render_system_prompt(&self, ctx: &PromptContext<'_>) -> Result<String>;

    fn render_user_prompt(&self, ctx: &PromptContext<'_>) -> Result<String>;
}

/// Placeholder substitution over the definition's templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTemplateRenderer;

impl DefaultTemplateRenderer {
    fn lookup(ctx: &PromptContext<'_>, name: &str) -> Option<String> {
        let builtin = match name {
            "agent_id" => Some(ctx.agent_id),
            "prompt" => Some(ctx.prompt),
            "context" => Some(ctx.context),
            _ => None,
        };
        if let Some(value) = builtin {
            return Some(value.to_string());
        }
        ctx.variables
            .get(name)
            .or_else(|| ctx.definition.variables.get(name))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }

    fn render(ctx: &PromptContext<'_>, template: &str) -> Result<String> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            Self::lookup(ctx, name).unwrap_or_else(|| {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            })
        });
        match missing {
            Some(name) => Err(AgentError::template(format!(
                "unknown variable `{name}` in template for agent `{}`",
                ctx.definition.id
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

impl TemplateRenderer for DefaultTemplateRenderer {
    fn render_system_prompt(&self, ctx: &PromptContext<'_>) -> Result<String> {
        match &ctx.definition.system_prompt_template {
            Some(template) => Self::render(ctx, template),
            None => {
                let base = Self::render(ctx, &ctx.definition.system_prompt)?;
                if ctx.context.trim().is_empty() {
                    return Ok(base);
                }
                Ok(format!("{base}\n\n## Context\n\n{}", ctx.context.trim()))
            }
        }
    }

    fn render_user_prompt(&self, ctx: &PromptContext<'_>) -> Result<String> {
        match &ctx.definition.user_prompt_template {
            Some(template) => Self::render(ctx, template),
            None => Ok(ctx.prompt.to_string()),
        }
    }
}
