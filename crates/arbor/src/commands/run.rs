//! Run command - one session through the agent tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use arbor_agent::{
    AutoConfirm, Catalog, Confirm, NullRenderer, Orchestrator, RunRequest, RuntimeOptions,
    StreamRenderer, WindowCompactor, builtin_registry, collect_invocations,
};
use arbor_hooks::{HookEvent, HookPayload, HookResponse};
use clap::Args;
use console::Style;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::Context;
use crate::terminal::{ConsoleRenderer, StdinConfirm};
use crate::wiring::{build_catalog, loop_config};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// The prompt to send
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    /// Agent to run instead of the manager
    #[arg(short, long)]
    pub agent: Option<String>,

    /// File whose contents become the agent's context
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Write a JSONL trace to this file
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Append to the trace file instead of truncating it
    #[arg(long)]
    pub append_trace: bool,

    /// Compact transcripts longer than this many messages
    #[arg(long)]
    pub compact_after: Option<usize>,

    /// Approve every tool confirmation without asking
    #[arg(short, long)]
    pub yes: bool,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    config.validate()?;
    let catalog = build_catalog(&config)?;

    let agent = match &args.agent {
        Some(id) => catalog
            .agent(id)
            .or_else(|| catalog.subagent(id))
            .ok_or_else(|| anyhow!("Unknown agent '{id}'"))?,
        None => catalog
            .manager()
            .ok_or_else(|| anyhow!("No manager agent configured; pass --agent"))?,
    };

    let confirm: Arc<dyn Confirm> = if args.yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinConfirm)
    };
    // JSON output replaces live rendering.
    let renderer: Arc<dyn StreamRenderer> = if ctx.json_output {
        Arc::new(NullRenderer)
    } else {
        Arc::new(ConsoleRenderer::new())
    };
    let cancellation = CancellationToken::new();

    let mut options = RuntimeOptions::new(Arc::new(catalog), std::env::current_dir()?)
        .with_tools(builtin_registry()?)
        .with_confirm(confirm)
        .with_env(std::env::vars().collect())
        .with_renderer(renderer)
        .with_config(loop_config(&config))
        .with_cancellation(cancellation.clone());
    if let Some(path) = args.trace.or_else(|| config.runtime.trace_path.clone()) {
        options = options.with_trace(path, args.append_trace || config.runtime.trace_append());
    }
    if let Some(max) = args.compact_after {
        options = options.with_compactor(Arc::new(WindowCompactor::new(max)));
    }

    let orchestrator = Arc::new(Orchestrator::new(options));
    orchestrator.install_agent_runner();
    orchestrator.hooks().on_fn(HookEvent::OnAgentError, |payload| async move {
        if let HookPayload::OnAgentError(error) = payload {
            tracing::debug!(agent_id = %error.agent_id, stack = ?error.stack, "Agent error chain");
        }
        Ok(HookResponse::Ack)
    });

    let token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; cancelling run");
            token.cancel();
        }
    });

    let mut request = RunRequest::new(agent, args.prompt.join(" "));
    if let Some(path) = &args.context {
        let context = std::fs::read_to_string(path)
            .with_context(|| format!("reading context file {}", path.display()))?;
        request = request.with_context(context);
    }

    let outcome = orchestrator.run_session(request).await?;
    let invocations = collect_invocations(&outcome.root);

    if ctx.json_output {
        let summary: Vec<_> = invocations
            .iter()
            .map(|inv| {
                json!({
                    "id": inv.id().to_string(),
                    "agent": inv.definition().id,
                    "depth": inv.depth(),
                    "iterations": inv.iterations(),
                    "truncated": inv.truncated(),
                    "usage": inv.usage(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "session_id": outcome.session_id,
                "output": outcome.root.final_message(),
                "invocations": summary,
            }))?
        );
    } else if ctx.verbose {
        let dim = Style::new().dim();
        let usage = outcome.root.usage();
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "session {} · {} invocation(s) · {} in / {} out tokens (root)",
                outcome.session_id,
                invocations.len(),
                usage.input_tokens,
                usage.output_tokens
            ))
        );
    }
    if outcome.root.truncated() {
        eprintln!(
            "{}",
            Style::new()
                .yellow()
                .apply_to("Iteration limit reached; the answer may be incomplete.")
        );
    }

    Ok(())
}
