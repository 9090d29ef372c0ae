//! Streaming chat-completion chunks as produced by a model provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Role;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// Fragment of a tool call; fragments sharing an `index` belong together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    /// Chunk carrying a single content delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self::with_delta(ChunkDelta {
            content: Some(content.into()),
            ..ChunkDelta::default()
        })
    }

    /// Chunk carrying a single reasoning delta.
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::with_delta(ChunkDelta {
            reasoning_content: Some(content.into()),
            ..ChunkDelta::default()
        })
    }

    /// Chunk carrying one tool-call fragment.
    pub fn tool_call(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::with_delta(ChunkDelta {
            tool_calls: vec![ToolCallDelta {
                index,
                id: id.map(str::to_owned),
                kind: id.map(|_| "function".to_owned()),
                function: Some(FunctionCallDelta {
                    name: name.map(str::to_owned),
                    arguments: Some(arguments.into()),
                }),
            }],
            ..ChunkDelta::default()
        })
    }

    pub fn with_delta(delta: ChunkDelta) -> Self {
        Self {
            object: "chat.completion.chunk".to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            ..Self::default()
        }
    }

    pub fn first_delta(&self) -> Option<&ChunkDelta> {
        self.choices.first().map(|choice| &choice.delta)
    }
}
