//! Transcript compaction.
//!
//! After each iteration the orchestrator asks the compactor for a plan. A
//! plan removes (or summarizes) the middle of the transcript while keeping
//! the leading system message, the first user message and the most recent
//! messages. Tool messages are never separated from the assistant message
//! that issued their call.

use arbor_llm::{SharedAdapter, StreamOptions};
use arbor_types::{ChatMessage, Role, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{AgentError, Result};
use crate::invocation::AgentInvocation;

/// Default number of recent messages kept verbatim.
const DEFAULT_KEEP_RECENT: usize = 8;

/// Longest tool output quoted in a summary request, in characters.
const SUMMARY_TOOL_OUTPUT_CHARS: usize = 500;

/// System prompt for mid-run summarization.
const SUMMARY_PROMPT: &str = "\
Summarize the earlier portion of this agent transcript concisely. Focus on:
- The task and any decisions made
- Tool calls issued and what they returned
- Open questions and remaining work

Provide a clear, factual summary in 1-2 paragraphs. The summary will replace \
the earlier messages while the most recent exchanges are preserved verbatim.";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// What a plan did to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Net decrease in transcript length.
    pub removed_messages: usize,
}

/// A prepared compaction.
#[async_trait]
pub trait CompactionPlan: Send {
    /// Why compaction is needed, for hooks and logs.
    fn reason(&self) -> Option<&str>;

    async fn apply(self: Box<Self>, messages: &mut Vec<ChatMessage>) -> Result<CompactionOutcome>;
}

/// Decides whether an invocation's transcript needs compacting.
#[async_trait]
pub trait TranscriptCompactor: Send + Sync {
    async fn plan(&self, invocation: &AgentInvocation) -> Option<Box<dyn CompactionPlan>>;
}

/// The span `[start, end)` that compaction may remove. Everything up to and
/// including the prompt turn stays; without a recorded prompt the first user
/// message is taken as the prompt.
fn removable_span(
    messages: &[ChatMessage],
    prompt_index: Option<usize>,
    keep_recent: usize,
) -> (usize, usize) {
    let head = prompt_index
        .or_else(|| messages.iter().position(|m| m.role == Role::User))
        .map(|i| i + 1)
        .unwrap_or_else(|| {
            messages
                .iter()
                .take_while(|m| matches!(m.role, Role::System | Role::Developer))
                .count()
        })
        .min(messages.len());

    let mut tail = messages.len().saturating_sub(keep_recent).max(head);
    while tail > head && messages.get(tail).is_some_and(|m| m.role == Role::Tool) {
        tail -= 1;
    }
    (head, tail)
}

// ─────────────────────────────────────────────────────────────────────────────
// Window compactor
// ─────────────────────────────────────────────────────────────────────────────

/// Drops the middle of the transcript once it exceeds `max_messages`.
#[derive(Debug, Clone)]
pub struct WindowCompactor {
    max_messages: usize,
    keep_recent: usize,
}

impl WindowCompactor {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            keep_recent: DEFAULT_KEEP_RECENT.min(max_messages),
        }
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }
}

struct WindowPlan {
    prompt_index: Option<usize>,
    keep_recent: usize,
    reason: String,
}

#[async_trait]
impl CompactionPlan for WindowPlan {
    fn reason(&self) -> Option<&str> {
        Some(&self.reason)
    }

    async fn apply(self: Box<Self>, messages: &mut Vec<ChatMessage>) -> Result<CompactionOutcome> {
        let (head, tail) = removable_span(messages, self.prompt_index, self.keep_recent);
        messages.drain(head..tail);
        Ok(CompactionOutcome {
            removed_messages: tail - head,
        })
    }
}

#[async_trait]
impl TranscriptCompactor for WindowCompactor {
    async fn plan(&self, invocation: &AgentInvocation) -> Option<Box<dyn CompactionPlan>> {
        let count = invocation.messages().len();
        if count <= self.max_messages {
            return None;
        }
        Some(Box::new(WindowPlan {
            prompt_index: invocation.prompt_index(),
            keep_recent: self.keep_recent,
            reason: format!("transcript has {count} messages (limit {})", self.max_messages),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summarizing compactor
// ─────────────────────────────────────────────────────────────────────────────

/// Replaces the middle of the transcript with a model-written summary.
pub struct SummarizingCompactor {
    adapter: SharedAdapter,
    model: String,
    max_messages: usize,
    keep_recent: usize,
    summary_prompt: Option<String>,
}

impl SummarizingCompactor {
    pub fn new(adapter: SharedAdapter, model: impl Into<String>, max_messages: usize) -> Self {
        Self {
            adapter,
            model: model.into(),
            max_messages,
            keep_recent: DEFAULT_KEEP_RECENT.min(max_messages),
            summary_prompt: None,
        }
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    /// Use a custom prompt instead of the default summary prompt.
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl TranscriptCompactor for SummarizingCompactor {
    async fn plan(&self, invocation: &AgentInvocation) -> Option<Box<dyn CompactionPlan>> {
        let count = invocation.messages().len();
        if count <= self.max_messages {
            return None;
        }
        Some(Box::new(SummaryPlan {
            prompt_index: invocation.prompt_index(),
            adapter: self.adapter.clone(),
            model: self.model.clone(),
            keep_recent: self.keep_recent,
            prompt: self
                .summary_prompt
                .clone()
                .unwrap_or_else(|| SUMMARY_PROMPT.to_string()),
            reason: format!("transcript has {count} messages (limit {})", self.max_messages),
        }))
    }
}

struct SummaryPlan {
    prompt_index: Option<usize>,
    adapter: SharedAdapter,
    model: String,
    keep_recent: usize,
    prompt: String,
    reason: String,
}

fn transcript_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let mut parts = Vec::new();
            match m.role {
                Role::Tool => {
                    let content: String = m.content.chars().take(SUMMARY_TOOL_OUTPUT_CHARS).collect();
                    let suffix = if content.len() < m.content.len() { "... [truncated]" } else { "" };
                    parts.push(format!("Tool result: {content}{suffix}"));
                }
                role => {
                    if !m.content.is_empty() {
                        parts.push(format!("{role}: {}", m.content));
                    }
                }
            }
            for call in &m.tool_calls {
                parts.push(format!("Tool call: {} ({})", call.name, call.id));
            }
            parts.join("\n")
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[async_trait]
impl CompactionPlan for SummaryPlan {
    fn reason(&self) -> Option<&str> {
        Some(&self.reason)
    }

    async fn apply(self: Box<Self>, messages: &mut Vec<ChatMessage>) -> Result<CompactionOutcome> {
        let (head, tail) = removable_span(messages, self.prompt_index, self.keep_recent);
        if tail - head < 2 {
            return Ok(CompactionOutcome { removed_messages: 0 });
        }

        let request = StreamOptions::new(
            self.model.clone(),
            vec![
                ChatMessage::system(self.prompt.clone()),
                ChatMessage::user(transcript_text(&messages[head..tail])),
            ],
        );
        let mut stream = self.adapter.stream(request);
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta { text } => summary.push_str(&text),
                StreamEvent::Error { message, .. } => {
                    return Err(AgentError::internal(format!("Compaction LLM call failed: {message}")));
                }
                StreamEvent::End { .. } => break,
                _ => {}
            }
        }
        if summary.trim().is_empty() {
            return Err(AgentError::internal("Compaction LLM call returned no summary"));
        }

        messages.splice(
            head..tail,
            [ChatMessage::user(format!(
                "[Summary of earlier conversation]\n{}",
                summary.trim()
            ))],
        );
        Ok(CompactionOutcome {
            removed_messages: tail - head - 1,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
