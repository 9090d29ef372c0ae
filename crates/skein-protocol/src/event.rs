//! Event envelope and the event taxonomy emitted by agents.
//!
//! Every event produced during a turn is wrapped in an [`Event`] envelope
//! carrying the producing agent's name (`author`, stamped lazily) and an
//! optional session id. [`EventKind::StateUpdate`] is the only variant that
//! mutates [`State`]; [`EventKind::Interruption`] and [`EventKind::Error`]
//! carry failure context and are not meant for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{EventId, SessionId};
use crate::message::Message;
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Name of the producing agent; empty until stamped.
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    OutputText {
        delta: String,
    },
    Reasoning {
        delta: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        tool_arguments: String,
    },
    ToolCompleted {
        tool_call_id: String,
        tool_name: String,
        tool_arguments: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_response: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_exception: Option<String>,
    },
    StateUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details_delta: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        message_delta: Vec<Message>,
    },
    Error {
        error_code: String,
        error_msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<String>,
    },
    Eof,
    Interruption(ContextInterruption),
}

/// Loop stage at which a hook interrupted the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeCycle {
    ToolCall,
    LlmCall,
    AgentCall,
}

impl LifeCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::LlmCall => "llm_call",
            Self::AgentCall => "agent_call",
        }
    }
}

/// Carries enough context to resume a turn that a hook aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInterruption {
    pub life_cycle: LifeCycle,
    pub reason: String,
    pub state: Box<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::default(),
            author: String::new(),
            session_id: None,
            created_at: Utc::now(),
            kind,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn output_text(delta: impl Into<String>) -> Self {
        Self::new(EventKind::OutputText {
            delta: delta.into(),
        })
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self::new(EventKind::Reasoning {
            delta: delta.into(),
        })
    }

    pub fn messages(message_delta: Vec<Message>) -> Self {
        Self::new(EventKind::StateUpdate {
            details_delta: None,
            message_delta,
        })
    }

    pub fn details(details_delta: Map<String, Value>) -> Self {
        Self::new(EventKind::StateUpdate {
            details_delta: Some(details_delta),
            message_delta: Vec::new(),
        })
    }

    pub fn error(
        error_code: impl Into<String>,
        error_msg: impl Into<String>,
        exception: Option<String>,
    ) -> Self {
        Self::new(EventKind::Error {
            error_code: error_code.into(),
            error_msg: error_msg.into(),
            exception,
        })
    }

    pub fn interruption(interruption: ContextInterruption) -> Self {
        Self::new(EventKind::Interruption(interruption))
    }

    pub fn eof() -> Self {
        Self::new(EventKind::Eof)
    }

    pub fn is_state_update(&self) -> bool {
        matches!(self.kind, EventKind::StateUpdate { .. })
    }

    /// Messages appended by this event; empty for non-StateUpdate variants.
    pub fn message_delta(&self) -> &[Message] {
        match &self.kind {
            EventKind::StateUpdate { message_delta, .. } => message_delta,
            _ => &[],
        }
    }

    pub fn details_delta(&self) -> Option<&Map<String, Value>> {
        match &self.kind {
            EventKind::StateUpdate { details_delta, .. } => details_delta.as_ref(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            EventKind::OutputText { .. } => "output_text",
            EventKind::Reasoning { .. } => "reasoning",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolCompleted { .. } => "tool_completed",
            EventKind::StateUpdate { .. } => "state_update",
            EventKind::Error { .. } => "error",
            EventKind::Eof => "eof",
            EventKind::Interruption(_) => "interruption",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    #[test]
    fn event_serializes_with_type_tag_next_to_envelope() {
        let event = Event::output_text("hello").with_author("Support");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "output_text");
        assert_eq!(value["delta"], "hello");
        assert_eq!(value["author"], "Support");

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn state_update_accessors() {
        let event = Event::messages(vec![Message::user("hi")]);
        assert!(event.is_state_update());
        assert_eq!(event.message_delta().len(), 1);
        assert_eq!(event.message_delta()[0].role, Role::User);
        assert!(event.details_delta().is_none());

        let text = Event::output_text("x");
        assert!(text.message_delta().is_empty());
    }

    #[test]
    fn interruption_round_trips_with_state_snapshot() {
        let mut state = State::default();
        state.apply(&Event::messages(vec![Message::user("hi")]));
        let event = Event::interruption(ContextInterruption {
            life_cycle: LifeCycle::ToolCall,
            reason: "approval failed".to_owned(),
            state: Box::new(state),
            details: Some(json!({"tool": "refund"})),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "interruption");
        assert_eq!(value["life_cycle"], "tool_call");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
