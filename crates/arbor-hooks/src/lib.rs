//! Lifecycle hook bus for Arbor.
//!
//! Listeners subscribe to a closed set of [`HookEvent`]s and may observe,
//! veto ([`HookResponse::Block`]) or, for `stop`, extend the conversation
//! ([`HookResponse::Continue`]).

pub mod bus;
pub mod event;
pub mod response;

pub use bus::{AgentRunner, HookBus, HookListener, SharedHookBus};
pub use event::{HookEvent, HookPayload};
pub use response::{Blocked, DispatchResult, HookError, HookFailure, HookResponse};
