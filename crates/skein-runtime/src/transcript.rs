use std::collections::HashSet;

use skein_protocol::{Message, Role, State};

/// Build the message list sent to the model on behalf of `agent_name`.
///
/// The instruction, when present, goes first as a system message. Assistant
/// messages written by other agents are replayed as user messages without
/// their tool calls (and skipped if that leaves them empty), and tool
/// results answering those calls are replayed as user messages too, so the
/// transcript never references a tool call the model cannot see.
pub fn build_chat_messages(
    state: &State,
    agent_name: &str,
    instruction: Option<&str>,
) -> Vec<Message> {
    let mut out = Vec::with_capacity(state.message_count() + 1);
    if let Some(instruction) = instruction.filter(|text| !text.is_empty()) {
        out.push(Message::system(instruction));
    }

    let mut visible_calls: HashSet<&str> = HashSet::new();
    for (author, message) in state.messages() {
        match message.role {
            Role::Assistant if author != agent_name => {
                if message.content.is_empty() {
                    continue;
                }
                out.push(Message::user(message.content.clone()));
            }
            Role::Assistant => {
                visible_calls.extend(message.tool_calls.iter().map(|call| call.id.as_str()));
                out.push(message.clone());
            }
            Role::Tool
                if !message
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| visible_calls.contains(id)) =>
            {
                out.push(Message::user(message.content.clone()));
            }
            _ => out.push(message.clone()),
        }
    }
    out
}
