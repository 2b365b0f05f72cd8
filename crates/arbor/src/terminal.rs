//! Console rendering and interactive confirmation.

use std::io::Write;

use arbor_agent::{AgentEvent, Confirm, StreamEvent, StreamRenderer};
use async_trait::async_trait;
use console::Style;
use parking_lot::Mutex;
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Renderer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RenderState {
    /// Invocation whose output was printed last.
    current: Option<String>,
    /// Whether stdout is mid-line.
    mid_line: bool,
}

impl RenderState {
    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

/// Writes assistant text to stdout, and tool activity, notifications and
/// errors to stderr. A header marks every switch between invocations.
#[derive(Debug, Default)]
pub struct ConsoleRenderer {
    state: Mutex<RenderState>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamRenderer for ConsoleRenderer {
    fn render(&self, event: &AgentEvent) {
        let dim = Style::new().dim();
        let mut state = self.state.lock();

        if let Some(agent_id) = &event.agent_id
            && state.current.as_ref() != Some(agent_id)
        {
            if state.current.is_some() {
                state.end_line();
                eprintln!("{}", dim.apply_to(format!("── {agent_id} ──")));
            }
            state.current = Some(agent_id.clone());
        }

        match &event.event {
            StreamEvent::Delta { text } => {
                print!("{text}");
                state.mid_line = !text.ends_with('\n');
            }
            StreamEvent::ReasoningDelta { text } => {
                print!("{}", dim.apply_to(text));
                state.mid_line = !text.ends_with('\n');
            }
            StreamEvent::ReasoningEnd => state.end_line(),
            StreamEvent::ToolCall(call) => {
                state.end_line();
                eprintln!("{}", dim.apply_to(format!("[Running: {}]", call.name)));
            }
            StreamEvent::ToolResult { .. } | StreamEvent::End { .. } => {}
            StreamEvent::Notification { payload, metadata } => {
                state.end_line();
                let style = match severity(metadata.as_ref()) {
                    Some("error") => Style::new().red(),
                    _ => Style::new().yellow(),
                };
                eprintln!("{} {}", style.apply_to("!"), notification_text(payload));
            }
            StreamEvent::Error { message, cause } => {
                state.end_line();
                let red = Style::new().red();
                match cause {
                    Some(cause) => eprintln!("{} {} ({})", red.apply_to("Error:"), message, cause),
                    None => eprintln!("{} {}", red.apply_to("Error:"), message),
                }
            }
        }
    }

    fn flush(&self) {
        self.state.lock().end_line();
        let _ = std::io::stdout().flush();
    }
}

fn severity(metadata: Option<&Map<String, Value>>) -> Option<&str> {
    metadata?.get("severity")?.as_str()
}

/// Notification payloads are usually strings; anything else prints as JSON.
fn notification_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Confirmation
// ─────────────────────────────────────────────────────────────────────────────

/// Asks on stderr and reads the answer from stdin. Anything but `y`/`yes`
/// declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, message: &str) -> bool {
        let prompt = format!("{} {} [y/N] ", Style::new().yellow().apply_to("?"), message);
        tokio::task::spawn_blocking(move || {
            eprint!("{prompt}");
            let _ = std::io::stderr().flush();
            let mut answer = String::new();
            std::io::stdin().read_line(&mut answer).is_ok() && is_yes(&answer)
        })
        .await
        .unwrap_or(false)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
