use std::collections::BTreeMap;

use skein_protocol::{ChatCompletionChunk, Event, Message, ToolCall, ToolCallDelta};

/// Folds streamed chunks into the assistant message of one model call.
///
/// Content deltas are concatenated. Tool-call fragments are grouped by
/// their `index`: the first fragment that carries an id or a name sets it,
/// argument fragments are appended in arrival order.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<u32, ToolCall>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return the event to surface for it, if any.
    pub fn push(&mut self, chunk: &ChatCompletionChunk) -> Option<Event> {
        let delta = chunk.first_delta()?;
        for fragment in &delta.tool_calls {
            self.merge_tool_call(fragment);
        }

        if let Some(content) = delta.content.as_deref().filter(|text| !text.is_empty()) {
            self.content.push_str(content);
            return Some(Event::output_text(content));
        }
        delta
            .reasoning_content
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(Event::reasoning)
    }

    fn merge_tool_call(&mut self, fragment: &ToolCallDelta) {
        let call = self
            .tool_calls
            .entry(fragment.index)
            .or_insert_with(|| ToolCall::new("", "", ""));
        if call.id.is_empty()
            && let Some(id) = &fragment.id
        {
            call.id.clone_from(id);
        }
        if let Some(kind) = fragment.kind.as_ref().filter(|kind| !kind.is_empty()) {
            call.kind.clone_from(kind);
        }
        if let Some(function) = &fragment.function {
            if call.function.name.is_empty()
                && let Some(name) = &function.name
            {
                call.function.name.clone_from(name);
            }
            if let Some(arguments) = &function.arguments {
                call.function.arguments.push_str(arguments);
            }
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant message; tool calls ordered by index.
    pub fn finish(self) -> Message {
        Message::assistant(self.content, self.tool_calls.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_protocol::{EventKind, Role};

    #[test]
    fn text_deltas_become_output_events_and_concatenate() {
        let mut accumulator = StreamAccumulator::new();
        let first = accumulator.push(&ChatCompletionChunk::text("hel"));
        let second = accumulator.push(&ChatCompletionChunk::text("lo"));
        assert!(matches!(
            first.map(|event| event.kind),
            Some(EventKind::OutputText { delta }) if delta == "hel"
        ));
        assert!(second.is_some());

        let message = accumulator.finish();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.text(), "hello");
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn reasoning_is_surfaced_but_not_recorded() {
        let mut accumulator = StreamAccumulator::new();
        let event = accumulator.push(&ChatCompletionChunk::reasoning("thinking"));
        assert!(matches!(
            event.map(|event| event.kind),
            Some(EventKind::Reasoning { delta }) if delta == "thinking"
        ));
        assert!(accumulator.finish().content.is_empty());
    }

    #[test]
    fn tool_call_fragments_merge_by_index() {
        let mut accumulator = StreamAccumulator::new();
        let chunks = [
            ChatCompletionChunk::tool_call(1, Some("call_b"), Some("B"), ""),
            ChatCompletionChunk::tool_call(0, Some("call_a"), Some("A"), "{\"city\":"),
            ChatCompletionChunk::tool_call(0, None, None, "\"Paris\"}"),
            ChatCompletionChunk::tool_call(1, None, None, "{}"),
        ];
        for chunk in &chunks {
            assert!(accumulator.push(chunk).is_none());
        }
        assert!(accumulator.has_tool_calls());

        let message = accumulator.finish();
        let names: Vec<&str> = message.tool_calls.iter().map(ToolCall::name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(message.tool_calls[0].id, "call_a");
        assert_eq!(message.tool_calls[0].function.arguments, "{\"city\":\"Paris\"}");
        assert_eq!(message.tool_calls[1].function.arguments, "{}");
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let mut accumulator = StreamAccumulator::new();
        assert!(accumulator.push(&ChatCompletionChunk::default()).is_none());
        assert!(accumulator.push(&ChatCompletionChunk::text("")).is_none());
        assert_eq!(accumulator.finish().content.text(), "");
    }
}
