//! Stream renderers receive every event of every invocation in the tree.

use arbor_types::AgentEvent;
use parking_lot::Mutex;

/// Consumer of attributed stream events.
pub trait StreamRenderer: Send + Sync {
    fn render(&self, event: &AgentEvent);

    /// Called at the end of each iteration.
    fn flush(&self) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl StreamRenderer for NullRenderer {
    fn render(&self, _event: &AgentEvent) {}
}

/// Keeps every event in memory. Used by tests and embedders that render
/// after the fact.
#[derive(Debug, Default)]
pub struct CollectingRenderer {
    events: Mutex<Vec<AgentEvent>>,
    flushes: Mutex<usize>,
}

impl CollectingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    /// Events attributed to `agent_id`.
    pub fn events_for(&self, agent_id: &str) -> Vec<AgentEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

impl StreamRenderer for CollectingRenderer {
    fn render(&self, event: &AgentEvent) {
        self.events.lock().push(event.clone());
    }

    fn flush(&self) {
        *self.flushes.lock() += 1;
    }
}
