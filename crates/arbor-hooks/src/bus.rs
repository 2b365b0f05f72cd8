//! The hook bus.
//!
//! Listeners for one event run strictly in registration order, one at a
//! time. Dispatch stops at the first block or the first error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::event::{HookEvent, HookPayload};
use crate::response::{Blocked, DispatchResult, HookError, HookFailure, HookResponse};

/// A hook listener.
#[async_trait]
pub trait HookListener: Send + Sync {
    async fn handle(&self, payload: &HookPayload) -> Result<HookResponse, HookError>;
}

/// Closure adapter. The closure receives its own copy of the payload.
struct FnListener<F>(F);

#[async_trait]
impl<F, Fut> HookListener for FnListener<F>
where
    F: Fn(HookPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookResponse, HookError>> + Send,
{
    async fn handle(&self, payload: &HookPayload) -> Result<HookResponse, HookError> {
        (self.0)(payload.clone()).await
    }
}

/// Lets hook listeners delegate a whole sub-run to another agent.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `agent_id` on `prompt` and return its final assistant text.
    async fn run_agent(&self, agent_id: &str, prompt: &str) -> Result<String, HookError>;
}

/// Shared hook bus handle.
pub type SharedHookBus = Arc<HookBus>;

#[derive(Default)]
pub struct HookBus {
    listeners: RwLock<HashMap<HookEvent, Vec<Arc<dyn HookListener>>>>,
    runner: RwLock<Option<Arc<dyn AgentRunner>>>,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBus")
            .field("listeners", &self.len())
            .field("agent_runner", &self.has_agent_runner())
            .finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    pub fn on(&self, event: HookEvent, listener: Arc<dyn HookListener>) {
        self.listeners.write().entry(event).or_default().push(listener);
    }

    /// Register a closure listener for `event`.
    pub fn on_fn<F, Fut>(&self, event: HookEvent, listener: F)
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookResponse, HookError>> + Send + 'static,
    {
        self.on(event, Arc::new(FnListener(listener)));
    }

    /// Total number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for_event(&self, event: HookEvent) -> usize {
        self.listeners.read().get(&event).map_or(0, Vec::len)
    }

    /// Dispatch `payload` to its event's listeners.
    pub async fn emit(&self, payload: HookPayload) -> DispatchResult {
        let event = payload.event();
        // Snapshot so no lock is held across listener awaits
        let listeners = self
            .listeners
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_default();

        let mut outcome = DispatchResult::default();
        for (index, listener) in listeners.iter().enumerate() {
            match listener.handle(&payload).await {
                Ok(HookResponse::Block { reason }) => {
                    tracing::debug!(event = %event, listener = index, reason = ?reason, "Hook blocked");
                    outcome.blocked = Some(Blocked {
                        reason,
                        listener: index,
                    });
                    break;
                }
                Ok(response) => outcome.results.push(response),
                Err(error) => {
                    tracing::warn!(event = %event, listener = index, error = %error, "Hook listener failed");
                    outcome.error = Some(error);
                    break;
                }
            }
        }
        outcome
    }

    /// Dispatch and enforce the event's class: listener errors fail every
    /// non-observational event, and a block fails events that abort on block.
    pub async fn emit_checked(&self, payload: HookPayload) -> Result<DispatchResult, HookFailure> {
        let event = payload.event();
        let mut outcome = self.emit(payload).await;
        if event.is_observational() {
            outcome.error = None;
            outcome.blocked = None;
            return Ok(outcome);
        }
        if let Some(source) = outcome.error.take() {
            return Err(HookFailure::Listener { event, source });
        }
        if event.aborts_on_block()
            && let Some(blocked) = outcome.blocked.take()
        {
            return Err(HookFailure::Blocked {
                event,
                reason: blocked.reason,
            });
        }
        Ok(outcome)
    }

    /// Register the single agent runner. Returns false if one is already set.
    pub fn set_agent_runner(&self, runner: Arc<dyn AgentRunner>) -> bool {
        let mut slot = self.runner.write();
        if slot.is_some() {
            tracing::warn!("Agent runner already registered; ignoring");
            return false;
        }
        *slot = Some(runner);
        true
    }

    pub fn has_agent_runner(&self) -> bool {
        self.runner.read().is_some()
    }

    /// Delegate a sub-run through the registered agent runner.
    pub async fn run_agent(&self, agent_id: &str, prompt: &str) -> Result<String, HookError> {
        let runner = self
            .runner
            .read()
            .clone()
            .ok_or_else(|| HookError::new("no agent runner registered"))?;
        runner.run_agent(agent_id, prompt).await
    }
}
