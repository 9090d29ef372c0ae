//! Extension points around tool and model calls.
//!
//! Each slot holds at most one hook. A hook either returns events to splice
//! into the output stream or interrupts the turn; an interrupt becomes a
//! single `Interruption` event and nothing else is produced for the turn.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use skein_protocol::{Event, State, ToolCall};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
#[error("interrupted: {reason}")]
pub struct HookInterrupt {
    pub reason: String,
    /// Snapshot to resume from; the current state is used when absent.
    pub state: Option<State>,
    pub details: Option<Value>,
}

impl HookInterrupt {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            state: None,
            details: None,
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type HookResult = Result<Vec<Event>, HookInterrupt>;

#[async_trait]
pub trait PreToolCallHook: Send + Sync {
    async fn pre_tool_call(&self, call: &ToolCall, state: &State) -> HookResult;
}

#[async_trait]
pub trait PostToolCallHook: Send + Sync {
    async fn post_tool_call(
        &self,
        call: &ToolCall,
        response: Option<&Value>,
        exception: Option<&str>,
        state: &State,
    ) -> HookResult;
}

#[async_trait]
pub trait PreLlmCallHook: Send + Sync {
    async fn pre_llm_call(&self, state: &State) -> HookResult;
}

#[async_trait]
pub trait PostLlmCallHook: Send + Sync {
    async fn post_llm_call(&self, state: &State) -> HookResult;
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_tool_call: Option<Arc<dyn PreToolCallHook>>,
    pub post_tool_call: Option<Arc<dyn PostToolCallHook>>,
    pub pre_llm_call: Option<Arc<dyn PreLlmCallHook>>,
    pub post_llm_call: Option<Arc<dyn PostLlmCallHook>>,
}

/// Decides whether a tool call may run.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, call: &ToolCall, state: &State) -> bool;
}

/// Pre-tool-call hook that asks an [`Approver`] before running a tool.
///
/// With a non-empty `guarded` set only those tools need approval.
pub struct ApprovalHook {
    approver: Arc<dyn Approver>,
    guarded: HashSet<String>,
}

impl ApprovalHook {
    pub fn new(approver: Arc<dyn Approver>) -> Self {
        Self {
            approver,
            guarded: HashSet::new(),
        }
    }

    pub fn guard(mut self, tool_name: impl Into<String>) -> Self {
        self.guarded.insert(tool_name.into());
        self
    }

    fn requires_approval(&self, call: &ToolCall) -> bool {
        self.guarded.is_empty() || self.guarded.contains(call.name())
    }
}

#[async_trait]
impl PreToolCallHook for ApprovalHook {
    async fn pre_tool_call(&self, call: &ToolCall, state: &State) -> HookResult {
        if !self.requires_approval(call) || self.approver.approve(call, state).await {
            return Ok(Vec::new());
        }
        info!(tool = %call.name(), tool_call_id = %call.id, "tool call rejected by approver");
        Err(HookInterrupt::new("approval failed").with_details(json!({
            "tool_call_id": call.id,
            "tool_name": call.name(),
            "tool_arguments": call.function.arguments,
        })))
    }
}
