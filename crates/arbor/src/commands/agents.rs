//! Agents command - list configured agents and their bindings.

use anyhow::Result;
use arbor_config::{AgentRole, ArborConfig};
use clap::Args;
use console::Style;
use serde_json::json;

use super::Context;

/// Arguments for the agents command.
#[derive(Args, Debug)]
pub struct AgentsArgs {
    /// Show only agents with this role (manager, agent, subagent)
    #[arg(long)]
    pub role: Option<String>,
}

/// One row of the listing.
#[derive(Debug, PartialEq)]
struct AgentRow {
    id: String,
    role: &'static str,
    provider: String,
    model: String,
    tools: Option<Vec<String>>,
    description: Option<String>,
}

fn role_name(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Manager => "manager",
        AgentRole::Agent => "agent",
        AgentRole::Subagent => "subagent",
    }
}

fn rows(config: &ArborConfig, role: Option<&str>) -> Vec<AgentRow> {
    config
        .agents
        .iter()
        .filter(|(_, agent)| role.is_none_or(|r| r == role_name(agent.role)))
        .map(|(id, agent)| {
            let provider = config
                .provider_for(id)
                .map(|(name, provider)| format!("{name} ({})", provider.kind))
                .unwrap_or_else(|_| "<unresolved>".to_string());
            AgentRow {
                id: id.clone(),
                role: role_name(agent.role),
                provider,
                model: config
                    .model_for(id)
                    .unwrap_or_else(|_| "<unresolved>".to_string()),
                tools: agent.tools.clone(),
                description: agent.description.clone(),
            }
        })
        .collect()
}

/// Run the agents command.
pub async fn run(args: AgentsArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let rows = rows(&config, args.role.as_deref());

    if ctx.json_output {
        let list: Vec<_> = rows
            .iter()
            .map(|row| {
                json!({
                    "id": row.id,
                    "role": row.role,
                    "provider": row.provider,
                    "model": row.model,
                    "tools": row.tools,
                    "description": row.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No agents configured.");
        return Ok(());
    }

    let bold = Style::new().bold();
    let dim = Style::new().dim();
    for row in &rows {
        println!("{} {}", bold.apply_to(&row.id), dim.apply_to(format!("[{}]", row.role)));
        println!("  provider: {}", row.provider);
        println!("  model:    {}", row.model);
        let tools = row
            .tools
            .as_ref()
            .map(|tools| tools.join(", "))
            .unwrap_or_else(|| "all".to_string());
        println!("  tools:    {}", tools);
        if let Some(description) = &row.description {
            println!("  {}", dim.apply_to(description));
        }
    }
    Ok(())
}
