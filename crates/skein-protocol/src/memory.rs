//! Long-term memory types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recalled memory snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub memory_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Memory {
    pub fn new(memory_content: impl Into<String>) -> Self {
        Self {
            memory_content: memory_content.into(),
            reference: None,
            metadata: None,
        }
    }
}

/// Ranked search result, best match first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMemoryResponse {
    pub memories: Vec<Memory>,
}

impl SearchMemoryResponse {
    /// Flattened text view, one snippet per line.
    pub fn content(&self) -> String {
        self.memories
            .iter()
            .map(|memory| memory.memory_content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// When the runner feeds new messages into the memory service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryUpdatePolicy {
    #[default]
    NoAutoUpdate,
    Blocking,
    NonBlocking,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_joins_snippets_with_newlines() {
        let response = SearchMemoryResponse {
            memories: vec![Memory::new("likes tea"), Memory::new("lives in Lyon")],
        };
        assert_eq!(response.content(), "likes tea\nlives in Lyon");
        assert_eq!(SearchMemoryResponse::default().content(), "");
    }
}
