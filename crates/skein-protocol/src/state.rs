//! Conversation state accumulated from `StateUpdate` events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{Event, EventKind};
use crate::ids::ContextId;
use crate::message::{Message, Role};

/// Sampling parameters forwarded verbatim to the model provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Provider-specific fields merged into the request body.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Session,
    CommonPrefix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationStrategy {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_history_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_tokens: Option<bool>,
}

/// Configuration for a server-side context created on first use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextParameters {
    #[serde(default)]
    pub mode: ContextMode,
    /// Seed messages stored with the context at creation.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_strategy: Option<TruncationStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// `StateUpdate` events with a non-empty message delta, in arrival order.
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ChatParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_parameters: Option<ContextParameters>,
}

impl State {
    pub fn with_parameters(mut self, parameters: ChatParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_context_parameters(mut self, context_parameters: ContextParameters) -> Self {
        self.context_parameters = Some(context_parameters);
        self
    }

    /// Apply a `StateUpdate` event. Details are merged key by key; the event
    /// is appended to `events` only when it carries messages. Returns whether
    /// anything changed; other event kinds are ignored.
    pub fn apply(&mut self, event: &Event) -> bool {
        let EventKind::StateUpdate {
            details_delta,
            message_delta,
        } = &event.kind
        else {
            return false;
        };

        let mut changed = false;
        if let Some(delta) = details_delta {
            for (key, value) in delta {
                self.details.insert(key.clone(), value.clone());
            }
            changed = true;
        }
        if !message_delta.is_empty() {
            self.events.push(event.clone());
            changed = true;
        }
        changed
    }

    /// Flattened transcript paired with the author of the carrying event.
    pub fn messages(&self) -> impl Iterator<Item = (&str, &Message)> {
        self.events.iter().flat_map(|event| {
            event
                .message_delta()
                .iter()
                .map(move |message| (event.author.as_str(), message))
        })
    }

    pub fn message_count(&self) -> usize {
        self.events
            .iter()
            .map(|event| event.message_delta().len())
            .sum()
    }

    /// Latest recorded message, scanning events from most recent backward.
    /// Within one event the first message matching `role` wins.
    pub fn latest_message(&self, role: Option<Role>) -> Option<&Message> {
        self.events.iter().rev().find_map(|event| {
            event
                .message_delta()
                .iter()
                .find(|message| role.is_none_or(|role| message.role == role))
        })
    }

    /// Messages recorded after the most recent assistant message.
    pub fn messages_since_last_assistant(&self) -> Vec<Message> {
        let messages: Vec<&Message> = self.messages().map(|(_, message)| message).collect();
        let start = messages
            .iter()
            .rposition(|message| message.role == Role::Assistant)
            .map_or(0, |index| index + 1);
        messages[start..].iter().map(|message| (*message).clone()).collect()
    }
}
