//! Conversion of events into client-facing completion chunks.
//!
//! Text and reasoning deltas become ordinary delta chunks; tool activity is
//! reported through `bot_usage.action_details`. Error events do not convert:
//! they surface as an `Err` carrying the code and message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SkeinError, SkeinResult};
use crate::event::{Event, EventKind};
use crate::message::Role;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const CHUNK_MODEL: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<BotChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_usage: Option<BotUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotChoice {
    pub index: u32,
    pub delta: BotDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotDelta {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotUsage {
    #[serde(default)]
    pub action_details: Vec<ActionDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDetail {
    pub name: String,
    #[serde(default)]
    pub tool_details: Vec<ToolDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDetail {
    pub name: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl BotChunk {
    fn empty(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            object: CHUNK_OBJECT.to_owned(),
            created: 0,
            model: CHUNK_MODEL.to_owned(),
            choices: Vec::new(),
            bot_usage: None,
        }
    }

    fn delta(id: &str, content: Option<String>, reasoning_content: Option<String>) -> Self {
        Self {
            choices: vec![BotChoice {
                index: 0,
                delta: BotDelta {
                    role: Role::Assistant,
                    content,
                    reasoning_content,
                },
                finish_reason: None,
            }],
            ..Self::empty(id)
        }
    }

    fn action(id: &str, tool_name: &str, input: &str, output: Option<Value>) -> Self {
        Self {
            bot_usage: Some(BotUsage {
                action_details: vec![ActionDetail {
                    name: tool_name.to_owned(),
                    tool_details: vec![ToolDetail {
                        name: tool_name.to_owned(),
                        input: input.to_owned(),
                        output,
                    }],
                }],
            }),
            ..Self::empty(id)
        }
    }
}

/// Convert one event into its wire chunk. Events with no wire form
/// (state updates, EOF, interruptions) yield `Ok(None)`.
pub fn event_to_chunk(event: &Event) -> SkeinResult<Option<BotChunk>> {
    let id = event.id.as_str();
    let chunk = match &event.kind {
        EventKind::OutputText { delta } => Some(BotChunk::delta(id, Some(delta.clone()), None)),
        EventKind::Reasoning { delta } => Some(BotChunk::delta(id, None, Some(delta.clone()))),
        EventKind::ToolCall {
            tool_name,
            tool_arguments,
            ..
        } => Some(BotChunk::action(id, tool_name, tool_arguments, None)),
        EventKind::ToolCompleted {
            tool_name,
            tool_arguments,
            tool_response,
            ..
        } => Some(BotChunk::action(
            id,
            tool_name,
            tool_arguments,
            tool_response.clone(),
        )),
        EventKind::Error {
            error_code,
            error_msg,
            exception,
        } => {
            return Err(SkeinError::Api {
                code: error_code.clone(),
                message: exception.clone().unwrap_or_else(|| error_msg.clone()),
            });
        }
        EventKind::StateUpdate { .. } | EventKind::Eof | EventKind::Interruption(_) => None,
    };
    Ok(chunk)
}
