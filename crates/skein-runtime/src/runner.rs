use std::sync::Arc;

use async_stream::stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use skein_memory::MemoryUpdater;
use skein_protocol::{
    Checkpoint, CheckpointId, CheckpointStore, Event, MemoryUpdatePolicy, Message, SessionId,
    SkeinError, SkeinResult, State, UserId,
};
use tracing::{debug, error, info, instrument};

use crate::agent::{Agent, astream};
use crate::{SharedState, shared_state};

/// Author recorded on the messages a caller submits.
pub const USER_AUTHOR: &str = "user";

pub type RunStream = BoxStream<'static, Event>;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub user_id: UserId,
    pub messages: Vec<Message>,
    /// Existing or new checkpoint; a fresh id is generated when absent.
    pub checkpoint_id: Option<CheckpointId>,
    /// Replaces the checkpoint's state for this turn.
    pub state: Option<State>,
    pub session_id: Option<SessionId>,
}

impl RunRequest {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
            checkpoint_id: None,
            state: None,
            session_id: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

struct Turn {
    checkpoint: Checkpoint,
    state: SharedState,
    user_id: UserId,
    session_id: Option<SessionId>,
    pending: Vec<Message>,
}

impl Turn {
    fn stamp(&self, mut event: Event) -> Event {
        if event.session_id.is_none() {
            event.session_id.clone_from(&self.session_id);
        }
        event
    }
}

/// Drives one agent over checkpointed conversations.
///
/// Each `StateUpdate` the agent yields is applied to the turn state,
/// persisted, and fed to the memory service (per policy) before the agent is
/// polled again; state updates are not forwarded, every other event is.
/// Failures never escape the stream: they are logged, surfaced as one
/// `Error` event, and the state is persisted a final time.
#[derive(Clone)]
pub struct Runner {
    app_name: String,
    agent: Arc<dyn Agent>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    memory: Option<Arc<MemoryUpdater>>,
    memory_policy: MemoryUpdatePolicy,
}

impl Runner {
    pub fn new(app_name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            checkpoint_store: None,
            memory: None,
            memory_policy: MemoryUpdatePolicy::default(),
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_memory(mut self, updater: Arc<MemoryUpdater>, policy: MemoryUpdatePolicy) -> Self {
        self.memory = Some(updater);
        self.memory_policy = policy;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn run(&self, request: RunRequest) -> RunStream {
        let runner = self.clone();
        Box::pin(stream! {
            let session_id = request.session_id.clone();
            let mut turn = match runner.start_turn(request).await {
                Ok(turn) => turn,
                Err(error) => {
                    yield runner.error_event(&error, session_id);
                    return;
                }
            };

            if !turn.pending.is_empty() {
                let submitted = Event::messages(std::mem::take(&mut turn.pending))
                    .with_author(USER_AUTHOR);
                let submitted = turn.stamp(submitted);
                if let Err(error) = runner.record(&mut turn, &submitted).await {
                    yield runner.error_event(&error, turn.session_id.clone());
                    runner.finish(&mut turn).await;
                    return;
                }
            }

            let mut events = astream(runner.agent.clone(), turn.state.clone());
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        let event = turn.stamp(event);
                        if !event.is_state_update() {
                            yield event;
                            continue;
                        }
                        if let Err(error) = runner.record(&mut turn, &event).await {
                            yield runner.error_event(&error, turn.session_id.clone());
                            break;
                        }
                    }
                    Err(error) => {
                        yield runner.error_event(&error, turn.session_id.clone());
                        break;
                    }
                }
            }
            drop(events);
            runner.finish(&mut turn).await;
        })
    }

    /// Load the checkpoint, creating it when missing. Without a store the
    /// checkpoint lives only for the turn.
    #[instrument(skip(self), fields(app_name = %self.app_name))]
    pub async fn get_or_create_checkpoint(
        &self,
        checkpoint_id: &CheckpointId,
        user_id: &UserId,
    ) -> SkeinResult<Checkpoint> {
        let Some(store) = &self.checkpoint_store else {
            return Ok(Checkpoint::new(
                &self.app_name,
                checkpoint_id.clone(),
                Some(user_id.clone()),
                State::default(),
            ));
        };
        if let Some(checkpoint) = store.get_checkpoint(&self.app_name, checkpoint_id).await? {
            debug!(version = checkpoint.version, "checkpoint loaded");
            return Ok(checkpoint);
        }
        info!("creating checkpoint");
        store
            .create_checkpoint(&self.app_name, checkpoint_id, Some(user_id.clone()), None)
            .await
    }

    async fn start_turn(&self, request: RunRequest) -> SkeinResult<Turn> {
        let checkpoint_id = request.checkpoint_id.unwrap_or_default();
        let mut checkpoint = self
            .get_or_create_checkpoint(&checkpoint_id, &request.user_id)
            .await?;
        if let Some(state) = request.state {
            checkpoint.state = state;
        }
        info!(
            app_name = %self.app_name,
            checkpoint_id = %checkpoint_id,
            agent = %self.agent.name(),
            messages = request.messages.len(),
            "turn started"
        );
        Ok(Turn {
            state: shared_state(checkpoint.state.clone()),
            checkpoint,
            user_id: request.user_id,
            session_id: request.session_id,
            pending: request.messages,
        })
    }

    async fn record(&self, turn: &mut Turn, event: &Event) -> SkeinResult<()> {
        let changed = turn.state.write().await.apply(event);
        if changed {
            self.persist(turn).await?;
        }
        let delta = event.message_delta();
        if !delta.is_empty() {
            self.update_memory(&turn.user_id, delta.to_vec()).await?;
        }
        Ok(())
    }

    async fn persist(&self, turn: &mut Turn) -> SkeinResult<()> {
        turn.checkpoint.state = turn.state.read().await.clone();
        let Some(store) = &self.checkpoint_store else {
            turn.checkpoint.touch();
            return Ok(());
        };
        let checkpoint_id = turn.checkpoint.id.clone();
        store
            .update_checkpoint(&self.app_name, &checkpoint_id, &mut turn.checkpoint)
            .await
    }

    /// Blocking failures and a closed queue end the turn; failures of queued
    /// updates are logged by the updater.
    async fn update_memory(&self, user_id: &UserId, messages: Vec<Message>) -> SkeinResult<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };
        let blocking = match self.memory_policy {
            MemoryUpdatePolicy::NoAutoUpdate => return Ok(()),
            MemoryUpdatePolicy::Blocking => true,
            MemoryUpdatePolicy::NonBlocking => false,
        };
        memory.update(user_id, messages, blocking).await
    }

    async fn finish(&self, turn: &mut Turn) {
        match self.persist(turn).await {
            Ok(()) => debug!(
                checkpoint_id = %turn.checkpoint.id,
                version = turn.checkpoint.version,
                "turn finished"
            ),
            Err(error) => error!(
                checkpoint_id = %turn.checkpoint.id,
                %error,
                "final checkpoint write failed"
            ),
        }
    }

    fn error_event(&self, error: &SkeinError, session_id: Option<SessionId>) -> Event {
        error!(
            app_name = %self.app_name,
            agent = %self.agent.name(),
            code = error.code(),
            %error,
            "turn failed"
        );
        let mut event =
            Event::error(error.code(), error.to_string(), None).with_author(self.agent.name());
        event.session_id = session_id;
        event
    }
}
