use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use skein_protocol::tool::empty_object_schema;
use skein_protocol::{
    ChatCompletionChunk, ChatRequest, ChunkStream, ContextChatRequest, ContextId, ContextRequest,
    Event, ModelProvider, SkeinError, SkeinResult, State, ToolDescriptor,
};
use skein_tools::FnTool;

use crate::{EventStream, SharedState, shared_state};

/// Provider replaying canned chunk lists, one per model call.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<ChatCompletionChunk>>>,
    failure: Mutex<Option<SkeinError>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    context_requests: Mutex<Vec<ContextChatRequest>>,
    contexts: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ChatCompletionChunk>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            failure: Mutex::new(None),
            chat_requests: Mutex::new(Vec::new()),
            context_requests: Mutex::new(Vec::new()),
            contexts: AtomicUsize::new(0),
        })
    }

    /// Provider whose first model call fails with `error`.
    pub fn failing(error: SkeinError) -> Arc<Self> {
        let provider = Self::new(Vec::new());
        *provider.failure.lock() = Some(error);
        provider
    }

    pub fn calls(&self) -> usize {
        self.chat_requests.lock().len() + self.context_requests.lock().len()
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn chat_request(&self, index: usize) -> Option<ChatRequest> {
        self.chat_requests.lock().get(index).cloned()
    }

    pub fn context_request(&self, index: usize) -> Option<ContextChatRequest> {
        self.context_requests.lock().get(index).cloned()
    }

    fn next_script(&self) -> SkeinResult<ChunkStream> {
        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| SkeinError::Provider("no scripted response left".to_owned()))?;
        Ok(Box::pin(futures_util::stream::iter(script.into_iter().map(Ok))))
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest) -> SkeinResult<ChunkStream> {
        self.chat_requests.lock().push(request);
        self.next_script()
    }

    async fn create_context(&self, _request: ContextRequest) -> SkeinResult<ContextId> {
        let index = self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(ContextId::from(format!("ctx-{index}")))
    }

    async fn stream_context_chat(&self, request: ContextChatRequest) -> SkeinResult<ChunkStream> {
        self.context_requests.lock().push(request);
        self.next_script()
    }
}

pub fn shared(state: State) -> SharedState {
    shared_state(state)
}

/// Consume `stream` the way the runner does, applying each state update
/// before polling again. Stops at the first error.
pub async fn drive(mut stream: EventStream, state: &SharedState) -> SkeinResult<Vec<Event>> {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        let event = item?;
        state.write().await.apply(&event);
        events.push(event);
    }
    Ok(events)
}

pub fn echo_tool(name: &str) -> FnTool {
    FnTool::new(
        ToolDescriptor::new(name, "echo arguments", empty_object_schema()),
        |arguments| async move { Ok(arguments) },
    )
}
