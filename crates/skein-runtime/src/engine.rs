//! LLM event stream engine.
//!
//! One call to [`LlmEventStream::create`] drives a single turn of the
//! tool-call / model-call / handoff loop and yields every event it produces.
//! The engine never writes conversation messages into the shared state
//! itself: each `StateUpdate` it yields must be applied by the consumer
//! before the next item is polled, and the next loop decision reads the
//! state that results. The engine only writes `context_id` during
//! [`LlmEventStream::init`].

use std::sync::Arc;

use async_stream::stream;
use futures_util::StreamExt;
use serde_json::Value;
use skein_protocol::{
    ChatRequest, ChunkStream, ContextChatRequest, ContextInterruption, ContextRequest, Event,
    EventKind, LifeCycle, Message, ModelProvider, SkeinError, SkeinResult, State, ToolCall,
};
use skein_tools::ToolPool;
use tracing::{debug, info, instrument, warn};

use crate::accumulator::StreamAccumulator;
use crate::agent::{HandoffTable, astream};
use crate::hooks::{HookInterrupt, HookResult, Hooks};
use crate::transcript::build_chat_messages;
use crate::{EventStream, SharedState};

pub const DEFAULT_MAX_MODEL_CALLS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Tools,
    Model,
    Handoff,
    Done,
}

#[derive(Clone)]
pub struct LlmEventStream {
    model: String,
    agent_name: String,
    state: SharedState,
    provider: Arc<dyn ModelProvider>,
    tool_pool: Option<Arc<ToolPool>>,
    handoffs: HandoffTable,
    instruction: Option<String>,
    hooks: Hooks,
    max_model_calls: usize,
}

impl LlmEventStream {
    pub fn new(
        model: impl Into<String>,
        agent_name: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        state: SharedState,
    ) -> Self {
        Self {
            model: model.into(),
            agent_name: agent_name.into(),
            state,
            provider,
            tool_pool: None,
            handoffs: HandoffTable::default(),
            instruction: None,
            hooks: Hooks::default(),
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }

    pub fn with_tool_pool(mut self, tool_pool: Option<Arc<ToolPool>>) -> Self {
        self.tool_pool = tool_pool;
        self
    }

    pub fn with_handoffs(mut self, handoffs: HandoffTable) -> Self {
        self.handoffs = handoffs;
        self
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        self.instruction = instruction;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_model_calls(mut self, max_model_calls: usize) -> Self {
        self.max_model_calls = max_model_calls.max(1);
        self
    }

    /// Create the server-side context when requested and not yet created,
    /// then refresh the tool listing.
    #[instrument(skip(self), fields(agent = %self.agent_name, model = %self.model))]
    pub async fn init(&self) -> SkeinResult<()> {
        let request = {
            let state = self.state.read().await;
            match (&state.context_parameters, &state.context_id) {
                (Some(parameters), None) => Some(ContextRequest {
                    model: self.model.clone(),
                    mode: parameters.mode,
                    messages: parameters.messages.clone(),
                    ttl: parameters.ttl,
                    truncation_strategy: parameters.truncation_strategy.clone(),
                }),
                _ => None,
            }
        };
        if let Some(request) = request {
            let context_id = self.provider.create_context(request).await?;
            info!(context_id = %context_id, "model context created");
            self.state.write().await.context_id = Some(context_id);
        }

        if let Some(tool_pool) = &self.tool_pool {
            let remote = tool_pool
                .refresh_tool_list()
                .await
                .map_err(|error| SkeinError::Provider(format!("{error:#}")))?;
            debug!(remote_tools = remote, "tool pool ready");
        }
        Ok(())
    }

    /// Run one turn. `messages` are emitted first as a `StateUpdate`.
    pub fn create(self, messages: Vec<Message>) -> EventStream {
        Box::pin(stream! {
            yield Ok(Event::messages(messages));

            let mut stage = if self.needs_tool_call().await {
                Stage::Tools
            } else {
                Stage::Model
            };
            let mut model_calls = 0usize;

            while stage != Stage::Done {
                if stage == Stage::Model {
                    if model_calls == self.max_model_calls {
                        warn!(agent = %self.agent_name, model_calls, "model call limit reached");
                        yield Err(SkeinError::InvalidState(format!(
                            "model call limit of {} reached",
                            self.max_model_calls
                        )));
                        return;
                    }
                    model_calls += 1;
                }

                let mut items = match stage {
                    Stage::Tools => self.clone().tool_call_stage(),
                    Stage::Model => self.clone().model_call_stage(),
                    Stage::Handoff => self.clone().agent_call_stage(),
                    Stage::Done => break,
                };
                while let Some(item) = items.next().await {
                    let terminal = ends_turn(&item);
                    yield item;
                    if terminal {
                        return;
                    }
                }

                stage = self.next_stage(stage).await;
                debug!(agent = %self.agent_name, ?stage, "engine stage selected");
            }
        })
    }

    async fn next_stage(&self, finished: Stage) -> Stage {
        match finished {
            Stage::Tools => Stage::Model,
            Stage::Model if self.needs_agent_call().await => Stage::Handoff,
            Stage::Model if self.needs_tool_call().await => Stage::Tools,
            Stage::Model | Stage::Handoff | Stage::Done => Stage::Done,
        }
    }

    async fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.state
            .read()
            .await
            .latest_message(None)
            .map(|message| message.tool_calls.clone())
            .unwrap_or_default()
    }

    async fn needs_tool_call(&self) -> bool {
        self.tool_pool.is_some() && !self.pending_tool_calls().await.is_empty()
    }

    async fn needs_agent_call(&self) -> bool {
        self.pending_tool_calls()
            .await
            .first()
            .is_some_and(|call| self.handoffs.is_handoff(call))
    }

    async fn interruption(&self, life_cycle: LifeCycle, interrupt: HookInterrupt) -> Event {
        info!(
            agent = %self.agent_name,
            life_cycle = life_cycle.as_str(),
            reason = %interrupt.reason,
            "turn interrupted by hook"
        );
        let state = match interrupt.state {
            Some(state) => state,
            None => self.state.read().await.clone(),
        };
        Event::interruption(ContextInterruption {
            life_cycle,
            reason: interrupt.reason,
            state: Box::new(state),
            details: interrupt.details,
        })
    }

    async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    fn tool_call_stage(self) -> EventStream {
        Box::pin(stream! {
            let Some(tool_pool) = self.tool_pool.clone() else {
                return;
            };
            for call in self.pending_tool_calls().await {
                if let Some(hook) = self.hooks.pre_tool_call.clone() {
                    let state = self.snapshot().await;
                    match hook.pre_tool_call(&call, &state).await {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(interrupt) => {
                            yield Ok(self.interruption(LifeCycle::ToolCall, interrupt).await);
                            return;
                        }
                    }
                }

                yield Ok(Event::new(EventKind::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name().to_owned(),
                    tool_arguments: call.function.arguments.clone(),
                }));

                let (response, exception) = execute_tool(&tool_pool, &call).await;
                yield Ok(Event::new(EventKind::ToolCompleted {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name().to_owned(),
                    tool_arguments: call.function.arguments.clone(),
                    tool_response: response.clone(),
                    tool_exception: exception.clone(),
                }));
                yield Ok(Event::messages(vec![Message::tool(
                    call.id.clone(),
                    tool_message_content(response.as_ref(), exception.as_deref()),
                )]));

                if let Some(hook) = self.hooks.post_tool_call.clone() {
                    let state = self.snapshot().await;
                    let outcome = hook
                        .post_tool_call(&call, response.as_ref(), exception.as_deref(), &state)
                        .await;
                    match outcome {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(interrupt) => {
                            yield Ok(self.interruption(LifeCycle::ToolCall, interrupt).await);
                            return;
                        }
                    }
                }
            }
        })
    }

    fn model_call_stage(self) -> EventStream {
        Box::pin(stream! {
            if let Some(hook) = self.hooks.pre_llm_call.clone() {
                let state = self.snapshot().await;
                match hook.pre_llm_call(&state).await {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(interrupt) => {
                        yield Ok(self.interruption(LifeCycle::LlmCall, interrupt).await);
                        return;
                    }
                }
            }

            let mut chunks = match self.open_model_stream().await {
                Ok(chunks) => chunks,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            let mut accumulator = StreamAccumulator::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        if let Some(event) = accumulator.push(&chunk) {
                            yield Ok(event);
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }
            }
            yield Ok(Event::messages(vec![accumulator.finish()]));

            if let Some(hook) = self.hooks.post_llm_call.clone() {
                let state = self.snapshot().await;
                let outcome: HookResult = hook.post_llm_call(&state).await;
                match outcome {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(interrupt) => {
                        yield Ok(self.interruption(LifeCycle::LlmCall, interrupt).await);
                        return;
                    }
                }
            }
        })
    }

    #[instrument(skip(self), fields(agent = %self.agent_name, model = %self.model))]
    async fn open_model_stream(&self) -> SkeinResult<ChunkStream> {
        let state = self.snapshot().await;
        let parameters = state.parameters.clone().unwrap_or_default();
        if let Some(context_id) = state.context_id.clone() {
            let request = ContextChatRequest {
                model: self.model.clone(),
                context_id,
                messages: state.messages_since_last_assistant(),
                parameters,
            };
            debug!(messages = request.messages.len(), "calling model with context");
            return self.provider.stream_context_chat(request).await;
        }

        let tools = self
            .tool_pool
            .as_ref()
            .map(|pool| {
                pool.list_tools()
                    .iter()
                    .map(|descriptor| descriptor.as_function_tool())
                    .collect()
            })
            .unwrap_or_default();
        let request = ChatRequest {
            model: self.model.clone(),
            messages: build_chat_messages(&state, &self.agent_name, self.instruction.as_deref()),
            tools,
            parameters,
        };
        debug!(messages = request.messages.len(), tools = request.tools.len(), "calling model");
        self.provider.stream_chat(request).await
    }

    fn agent_call_stage(self) -> EventStream {
        Box::pin(stream! {
            let Some(call) = self.pending_tool_calls().await.into_iter().next() else {
                return;
            };
            let target = match self.handoffs.resolve(&call) {
                Ok(target) => target,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            if let Some(hook) = self.hooks.pre_tool_call.clone() {
                let state = self.snapshot().await;
                match hook.pre_tool_call(&call, &state).await {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(interrupt) => {
                        yield Ok(self.interruption(LifeCycle::AgentCall, interrupt).await);
                        return;
                    }
                }
            }

            info!(from = %self.agent_name, to = %target.name(), "handing off conversation");
            yield Ok(Event::messages(vec![Message::tool(
                call.id.clone(),
                format!("switched to {}", target.name()),
            )]));

            let mut delegated = astream(target, self.state.clone());
            while let Some(item) = delegated.next().await {
                yield item;
            }
        })
    }
}

fn ends_turn(item: &SkeinResult<Event>) -> bool {
    matches!(
        item,
        Err(_)
            | Ok(Event {
                kind: EventKind::Interruption(_),
                ..
            })
    )
}

async fn execute_tool(tool_pool: &ToolPool, call: &ToolCall) -> (Option<Value>, Option<String>) {
    let arguments = match call.parse_arguments() {
        Ok(arguments) => arguments,
        Err(error) => {
            warn!(tool = %call.name(), %error, "tool arguments are not valid JSON");
            return (None, Some(error.to_string()));
        }
    };
    match tool_pool.execute_tool(call.name(), arguments).await {
        Ok(response) => (Some(response), None),
        Err(error) => {
            warn!(tool = %call.name(), error = %format!("{error:#}"), "tool call failed");
            (None, Some(format!("{error:#}")))
        }
    }
}

/// Text recorded as the tool message: strings verbatim, other JSON values
/// serialized, failures as an error line.
fn tool_message_content(response: Option<&Value>, exception: Option<&str>) -> String {
    match (response, exception) {
        (_, Some(exception)) => format!("error: {exception}"),
        (Some(Value::String(text)), None) => text.clone(),
        (Some(value), None) => value.to_string(),
        (None, None) => String::new(),
    }
}
