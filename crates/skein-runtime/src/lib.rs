//! # skein-runtime
//!
//! Agent execution for skein: the LLM event stream engine, hook chain,
//! agents with handoff, and the checkpointing runner.
//!
//! ## Module Overview
//!
//! - [`engine`]: `LlmEventStream`, the tool-call / model-call / handoff loop
//! - [`agent`]: `Agent` trait, author stamping, `DefaultAgent`, handoff table
//! - [`hooks`]: Pre/post tool and model hooks, `ApprovalHook`
//! - [`runner`]: `Runner`: checkpoint get-or-create, persistence, memory
//! - [`transcript`]: Model-facing message list built from `State`
//! - [`accumulator`]: Folding streamed chunks into an assistant message

use std::sync::Arc;

use futures_util::stream::BoxStream;
use skein_protocol::{Event, SkeinResult, State};
use tokio::sync::RwLock;

pub mod accumulator;
pub mod agent;
pub mod engine;
pub mod hooks;
pub mod runner;
pub mod transcript;

#[cfg(test)]
mod testing;

pub use accumulator::StreamAccumulator;
pub use agent::{Agent, DefaultAgent, DefaultAgentBuilder, HandoffTable, astream};
pub use engine::{DEFAULT_MAX_MODEL_CALLS, LlmEventStream};
pub use hooks::{
    ApprovalHook, Approver, HookInterrupt, HookResult, Hooks, PostLlmCallHook, PostToolCallHook,
    PreLlmCallHook, PreToolCallHook,
};
pub use runner::{RunRequest, RunStream, Runner, USER_AUTHOR};
pub use transcript::build_chat_messages;

/// Conversation state shared between a runner and the agents it drives.
pub type SharedState = Arc<RwLock<State>>;

/// Events produced by an agent turn; an `Err` item ends the turn.
pub type EventStream = BoxStream<'static, SkeinResult<Event>>;

pub fn shared_state(state: State) -> SharedState {
    Arc::new(RwLock::new(state))
}
