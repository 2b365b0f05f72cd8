//! Scripted adapter for deterministic tests.
//!
//! Replays canned event scripts in order, one per call, and records every
//! [`StreamOptions`] it was given.

use std::collections::VecDeque;
use std::sync::Mutex;

use arbor_types::StreamEvent;

use crate::adapter::{EventStream, ProviderAdapter, StreamOptions};

#[derive(Debug)]
pub struct ScriptedAdapter {
    name: String,
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<StreamOptions>>,
}

impl ScriptedAdapter {
    /// Each inner vector is the full event sequence of one call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            name: "scripted".to_string(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A single call answering with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![vec![
            StreamEvent::delta(text),
            StreamEvent::end("stop"),
        ]])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Every options value received so far.
    pub fn requests(&self) -> Vec<StreamOptions> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self, options: StreamOptions) -> EventStream {
        self.requests.lock().unwrap().push(options);
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::error("ScriptedAdapter: no more scripts")]);
        Box::pin(futures::stream::iter(events))
    }
}
