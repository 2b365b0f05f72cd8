//! Execution traces written as JSON lines.
//!
//! One record per lifecycle phase. The first record of a run truncates the
//! file unless appending was requested; later records always append.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::invocation::AgentInvocation;

// ─────────────────────────────────────────────────────────────────────────────
// Record types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    AgentStart,
    ModelCall,
    ToolCall,
    ToolResult,
    IterationComplete,
    AgentComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub phase: TracePhase,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub depth: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl TraceRecord {
    /// A record for `invocation` at its current iteration.
    pub fn for_invocation(phase: TracePhase, invocation: &AgentInvocation, detail: Value) -> Self {
        let iteration = invocation.iterations();
        Self {
            phase,
            agent_id: invocation.id().to_string(),
            parent_id: invocation.parent_id().map(ToString::to_string),
            depth: invocation.depth(),
            timestamp: Utc::now(),
            iteration: (iteration > 0).then_some(iteration),
            detail,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for trace records.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn write(&self, path: &Path, record: &TraceRecord, append: bool) -> std::io::Result<()>;
}

/// Writes one JSON object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlTraceSink;

#[async_trait]
impl TraceSink for JsonlTraceSink {
    async fn write(&self, path: &Path, record: &TraceRecord, append: bool) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Keeps records in memory along with the append flag each was written with.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<(TraceRecord, bool)>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn append_flags(&self) -> Vec<bool> {
        self.records.lock().iter().map(|(_, append)| *append).collect()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn write(&self, _path: &Path, record: &TraceRecord, append: bool) -> std::io::Result<()> {
        self.records.lock().push((record.clone(), append));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracer
// ─────────────────────────────────────────────────────────────────────────────

/// Per-run writer. Write failures are logged and never fail the run.
pub(crate) struct Tracer {
    sink: Arc<dyn TraceSink>,
    path: Option<PathBuf>,
    append_first: bool,
    started: AtomicBool,
}

impl Tracer {
    pub(crate) fn new(sink: Arc<dyn TraceSink>, path: Option<PathBuf>, append_first: bool) -> Self {
        Self {
            sink,
            path,
            append_first,
            started: AtomicBool::new(false),
        }
    }

    pub(crate) async fn record(&self, phase: TracePhase, invocation: &AgentInvocation, detail: Value) {
        let Some(path) = &self.path else {
            return;
        };
        let record = TraceRecord::for_invocation(phase, invocation, detail);
        let append = self.started.swap(true, Ordering::SeqCst) || self.append_first;
        if let Err(e) = self.sink.write(path, &record, append).await {
            tracing::warn!(path = %path.display(), phase = ?phase, error = %e, "Failed to write trace record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(phase: TracePhase) -> TraceRecord {
        TraceRecord {
            phase,
            agent_id: "a-1".to_string(),
            parent_id: None,
            depth: 0,
            timestamp: Utc::now(),
            iteration: Some(1),
            detail: json!({"tool": "x"}),
        }
    }

    #[test]
    fn test_record_serialization() {
        let json = serde_json::to_value(record(TracePhase::IterationComplete)).unwrap();
        assert_eq!(json["phase"], "iteration_complete");
        assert!(json.get("parent_id").is_none());
        assert_eq!(json["detail"]["tool"], "x");
    }

    #[tokio::test]
    async fn test_jsonl_sink_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale\n").unwrap();

        let sink = JsonlTraceSink;
        sink.write(&path, &record(TracePhase::AgentStart), false).await.unwrap();
        sink.write(&path, &record(TracePhase::AgentComplete), true).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: TraceRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.phase, TracePhase::AgentStart);
    }

    #[tokio::test]
    async fn test_jsonl_sink_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("trace.jsonl");
        JsonlTraceSink
            .write(&path, &record(TracePhase::ModelCall), false)
            .await
            .unwrap();
        assert!(path.exists());
    }
}
