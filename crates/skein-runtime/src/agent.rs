use std::sync::Arc;

use async_stream::stream;
use futures_util::StreamExt;
use indexmap::IndexMap;
use skein_protocol::{ChatParameters, ModelProvider, SkeinError, SkeinResult, ToolCall};
use skein_tools::{HANDOFF_AGENT_ARG, HANDOFF_TOOL_NAME, HandoffTarget, HandoffTool, Tool, ToolPool};
use tracing::warn;

use crate::engine::{DEFAULT_MAX_MODEL_CALLS, LlmEventStream};
use crate::hooks::{Hooks, PostLlmCallHook, PostToolCallHook, PreLlmCallHook, PreToolCallHook};
use crate::{EventStream, SharedState};

/// Something that can take a turn on a shared conversation state.
///
/// `run` yields raw events; callers should go through [`astream`] so that
/// every event carries the agent's name.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn run(&self, state: SharedState) -> EventStream;
}

/// Run `agent` and stamp its name on events that have no author yet.
///
/// Events forwarded from a sub-agent keep the sub-agent's name.
pub fn astream(agent: Arc<dyn Agent>, state: SharedState) -> EventStream {
    let name = agent.name().to_owned();
    Box::pin(agent.run(state).map(move |item| {
        item.map(|mut event| {
            if event.author.is_empty() {
                event.author.clone_from(&name);
            }
            event
        })
    }))
}

/// Sub-agents reachable by handoff, in registration order.
#[derive(Clone, Default)]
pub struct HandoffTable {
    agents: Arc<IndexMap<String, Arc<dyn Agent>>>,
}

impl HandoffTable {
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
        let mut table = IndexMap::with_capacity(agents.len());
        for agent in agents {
            let name = agent.name().to_owned();
            if table.insert(name.clone(), agent).is_some() {
                warn!(agent = %name, "duplicate sub-agent name, keeping the last one");
            }
        }
        Self {
            agents: Arc::new(table),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn targets(&self) -> Vec<HandoffTarget> {
        self.agents
            .values()
            .map(|agent| HandoffTarget {
                name: agent.name().to_owned(),
                description: agent.description().to_owned(),
            })
            .collect()
    }

    /// Whether `call` asks to transfer control: the handoff tool itself or
    /// a tool named after a registered sub-agent.
    pub fn is_handoff(&self, call: &ToolCall) -> bool {
        !self.is_empty() && (call.name() == HANDOFF_TOOL_NAME || self.agents.contains_key(call.name()))
    }

    /// Target named by the call's `agent_name` argument, else by the tool name.
    pub fn resolve(&self, call: &ToolCall) -> SkeinResult<Arc<dyn Agent>> {
        let requested = call
            .parse_arguments()
            .ok()
            .and_then(|arguments| {
                arguments
                    .get(HANDOFF_AGENT_ARG)
                    .and_then(|name| name.as_str())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| call.name().to_owned());
        self.get(&requested)
            .ok_or(SkeinError::UnknownAgent(requested))
    }
}

/// Model-backed agent running the event stream engine.
pub struct DefaultAgent {
    name: String,
    description: String,
    model: String,
    instruction: Option<String>,
    provider: Arc<dyn ModelProvider>,
    tool_pool: Option<Arc<ToolPool>>,
    handoffs: HandoffTable,
    hooks: Hooks,
    parameters: Option<ChatParameters>,
    max_model_calls: usize,
}

impl DefaultAgent {
    pub fn builder(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
    ) -> DefaultAgentBuilder {
        DefaultAgentBuilder {
            name: name.into(),
            description: String::new(),
            model: model.into(),
            instruction: None,
            provider,
            tools: ToolPool::new(),
            sub_agents: Vec::new(),
            hooks: Hooks::default(),
            parameters: None,
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tool_pool(&self) -> Option<&Arc<ToolPool>> {
        self.tool_pool.as_ref()
    }

    pub fn handoffs(&self) -> &HandoffTable {
        &self.handoffs
    }

    fn engine(&self, state: SharedState) -> LlmEventStream {
        LlmEventStream::new(&self.model, &self.name, self.provider.clone(), state)
            .with_tool_pool(self.tool_pool.clone())
            .with_handoffs(self.handoffs.clone())
            .with_instruction(self.instruction.clone())
            .with_hooks(self.hooks.clone())
            .with_max_model_calls(self.max_model_calls)
    }
}

impl Agent for DefaultAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn run(&self, state: SharedState) -> EventStream {
        let engine = self.engine(state.clone());
        let parameters = self.parameters.clone();
        Box::pin(stream! {
            if let Some(parameters) = parameters {
                let mut state = state.write().await;
                if state.parameters.is_none() {
                    state.parameters = Some(parameters);
                }
            }
            if let Err(error) = engine.init().await {
                yield Err(error);
                return;
            }
            let mut events = engine.create(Vec::new());
            while let Some(item) = events.next().await {
                yield item;
            }
        })
    }
}

pub struct DefaultAgentBuilder {
    name: String,
    description: String,
    model: String,
    instruction: Option<String>,
    provider: Arc<dyn ModelProvider>,
    tools: ToolPool,
    sub_agents: Vec<Arc<dyn Agent>>,
    hooks: Hooks,
    parameters: Option<ChatParameters>,
    max_model_calls: usize,
}

impl DefaultAgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(Arc::new(tool));
        self
    }

    /// Replace the tool pool wholesale, e.g. one that includes tool servers.
    pub fn tool_pool(mut self, tools: ToolPool) -> Self {
        self.tools = tools;
        self
    }

    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    /// Default model parameters, used when the state carries none.
    pub fn parameters(mut self, parameters: ChatParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn pre_tool_call_hook(mut self, hook: Arc<dyn PreToolCallHook>) -> Self {
        self.hooks.pre_tool_call = Some(hook);
        self
    }

    pub fn post_tool_call_hook(mut self, hook: Arc<dyn PostToolCallHook>) -> Self {
        self.hooks.post_tool_call = Some(hook);
        self
    }

    pub fn pre_llm_call_hook(mut self, hook: Arc<dyn PreLlmCallHook>) -> Self {
        self.hooks.pre_llm_call = Some(hook);
        self
    }

    pub fn post_llm_call_hook(mut self, hook: Arc<dyn PostLlmCallHook>) -> Self {
        self.hooks.post_llm_call = Some(hook);
        self
    }

    pub fn max_model_calls(mut self, max_model_calls: usize) -> Self {
        self.max_model_calls = max_model_calls;
        self
    }

    pub fn build(self) -> DefaultAgent {
        let handoffs = HandoffTable::new(self.sub_agents);
        let mut tools = self.tools;
        if !handoffs.is_empty() {
            tools.register_first(Arc::new(HandoffTool::new(handoffs.targets())));
        }
        DefaultAgent {
            name: self.name,
            description: self.description,
            model: self.model,
            instruction: self.instruction,
            provider: self.provider,
            tool_pool: (!tools.is_empty()).then(|| Arc::new(tools)),
            handoffs,
            hooks: self.hooks,
            parameters: self.parameters,
            max_model_calls: self.max_model_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookInterrupt, HookResult};
    use crate::testing::{ScriptedProvider, drive, echo_tool, shared};
    use anyhow::Result;
    use skein_protocol::{
        ChatCompletionChunk, Event, EventKind, LifeCycle, Message, Role, State,
    };

    fn billing(provider: Arc<ScriptedProvider>) -> Arc<dyn Agent> {
        Arc::new(
            DefaultAgent::builder("Billing", "test-model", provider)
                .description("refunds and invoices")
                .instruction("you handle billing")
                .build(),
        )
    }

    #[tokio::test]
    async fn handoff_delegates_and_stamps_authors() -> Result<()> {
        let provider = ScriptedProvider::new(vec![
            vec![ChatCompletionChunk::tool_call(
                0,
                Some("call_1"),
                Some(HANDOFF_TOOL_NAME),
                r#"{"agent_name":"Billing"}"#,
            )],
            vec![ChatCompletionChunk::text("refund issued")],
        ]);
        let triage: Arc<dyn Agent> = Arc::new(
            DefaultAgent::builder("Triage", "test-model", provider.clone())
                .sub_agent(billing(provider.clone()))
                .build(),
        );
        let state = shared(State::default());
        state
            .write()
            .await
            .apply(&Event::messages(vec![Message::user("refund please")]).with_author("user"));

        let events = drive(astream(triage, state.clone()), &state).await?;

        let switched = events
            .iter()
            .find(|event| {
                event
                    .message_delta()
                    .iter()
                    .any(|message| message.content.text() == "switched to Billing")
            })
            .expect("handoff acknowledgement");
        assert_eq!(switched.author, "Triage");
        assert_eq!(switched.message_delta()[0].role, Role::Tool);

        let reply = events
            .iter()
            .find(|event| matches!(&event.kind, EventKind::OutputText { delta } if delta == "refund issued"))
            .expect("billing reply");
        assert_eq!(reply.author, "Billing");
        assert!(events.iter().all(|event| !event.author.is_empty()));

        let handoff_request = provider.chat_request(0).expect("triage call");
        assert_eq!(handoff_request.tools[0].function.name, HANDOFF_TOOL_NAME);
        let billing_request = provider.chat_request(1).expect("billing call");
        assert_eq!(billing_request.messages[0].content.text(), "you handle billing");
        assert!(billing_request.tools.is_empty());
        assert_eq!(provider.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn tool_named_after_sub_agent_hands_off() -> Result<()> {
        let provider = ScriptedProvider::new(vec![
            vec![ChatCompletionChunk::tool_call(0, Some("call_1"), Some("Billing"), "{}")],
            vec![ChatCompletionChunk::text("hi from billing")],
        ]);
        let triage: Arc<dyn Agent> = Arc::new(
            DefaultAgent::builder("Triage", "test-model", provider.clone())
                .sub_agent(billing(provider.clone()))
                .build(),
        );
        let state = shared(State::default());
        let events = drive(astream(triage, state.clone()), &state).await?;
        assert!(events.iter().any(|event| event.author == "Billing"));
        Ok(())
    }

    struct HoldTransfers;

    #[async_trait::async_trait]
    impl PreToolCallHook for HoldTransfers {
        async fn pre_tool_call(&self, call: &ToolCall, _state: &State) -> HookResult {
            Err(HookInterrupt::new("transfer needs a supervisor")
                .with_details(serde_json::json!({"tool_call_id": call.id})))
        }
    }

    #[tokio::test]
    async fn hook_can_hold_a_handoff() -> Result<()> {
        let provider = ScriptedProvider::new(vec![
            vec![ChatCompletionChunk::tool_call(
                0,
                Some("call_1"),
                Some(HANDOFF_TOOL_NAME),
                r#"{"agent_name":"Billing"}"#,
            )],
            vec![ChatCompletionChunk::text("never sent")],
        ]);
        let triage: Arc<dyn Agent> = Arc::new(
            DefaultAgent::builder("Triage", "test-model", provider.clone())
                .sub_agent(billing(provider.clone()))
                .pre_tool_call_hook(Arc::new(HoldTransfers))
                .build(),
        );
        let state = shared(State::default());
        let events = drive(astream(triage, state.clone()), &state).await?;

        let last = events.last().expect("interruption event");
        assert_eq!(last.author, "Triage");
        match &last.kind {
            EventKind::Interruption(interruption) => {
                assert_eq!(interruption.life_cycle, LifeCycle::AgentCall);
                assert_eq!(interruption.reason, "transfer needs a supervisor");
                assert_eq!(
                    interruption.details,
                    Some(serde_json::json!({"tool_call_id": "call_1"}))
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!events.iter().any(|event| event.author == "Billing"));
        assert!(!events.iter().any(|event| {
            event
                .message_delta()
                .iter()
                .any(|message| message.role == Role::Tool)
        }));
        assert_eq!(provider.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_handoff_target_is_an_error() -> Result<()> {
        let provider = ScriptedProvider::new(vec![vec![ChatCompletionChunk::tool_call(
            0,
            Some("call_1"),
            Some(HANDOFF_TOOL_NAME),
            r#"{"agent_name":"Legal"}"#,
        )]]);
        let triage: Arc<dyn Agent> = Arc::new(
            DefaultAgent::builder("Triage", "test-model", provider.clone())
                .sub_agent(billing(provider.clone()))
                .build(),
        );
        let state = shared(State::default());
        let result = drive(astream(triage, state.clone()), &state).await;
        assert!(matches!(result, Err(SkeinError::UnknownAgent(name)) if name == "Legal"));
        Ok(())
    }

    #[tokio::test]
    async fn agent_without_tools_calls_the_model_once() -> Result<()> {
        let provider = ScriptedProvider::new(vec![vec![ChatCompletionChunk::text("hello")]]);
        let agent = DefaultAgent::builder("Solo", "test-model", provider.clone()).build();
        assert!(agent.tool_pool().is_none());

        let state = shared(State::default());
        drive(astream(Arc::new(agent), state.clone()), &state).await?;
        assert_eq!(provider.calls(), 1);
        Ok(())
    }

    #[test]
    fn handoff_tool_is_listed_first() {
        let provider = ScriptedProvider::new(Vec::new());
        let agent = DefaultAgent::builder("Triage", "test-model", provider.clone())
            .tool(echo_tool("lookup"))
            .sub_agent(billing(provider))
            .build();
        let names: Vec<String> = agent
            .tool_pool()
            .map(|pool| pool.list_tools().into_iter().map(|tool| tool.name).collect())
            .unwrap_or_default();
        assert_eq!(names, vec![HANDOFF_TOOL_NAME, "lookup"]);
        assert_eq!(agent.handoffs().len(), 1);
    }

    #[test]
    fn resolve_prefers_agent_name_argument() {
        let provider = ScriptedProvider::new(Vec::new());
        let table = HandoffTable::new(vec![billing(provider)]);
        let by_argument = ToolCall::new("c", HANDOFF_TOOL_NAME, r#"{"agent_name":"Billing"}"#);
        assert_eq!(table.resolve(&by_argument).map(|agent| agent.name().to_owned()).ok(), Some("Billing".to_owned()));
        assert!(table.is_handoff(&ToolCall::new("c", "Billing", "")));
        assert!(!table.is_handoff(&ToolCall::new("c", "lookup", "{}")));
        assert!(!HandoffTable::default().is_handoff(&by_argument));
    }
}
