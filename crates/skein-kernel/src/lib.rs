use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use skein_checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
use skein_memory::MemoryUpdater;
use skein_protocol::{
    Checkpoint, CheckpointId, CheckpointStore, MemoryService, MemoryUpdatePolicy, ModelProvider,
    SearchMemoryResponse, UserId,
};
use skein_runtime::{Agent, DefaultAgent, DefaultAgentBuilder, Runner};
use tracing::{info, instrument};

pub const DEFAULT_MEMORY_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SkeinBuilder {
    app_name: String,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    checkpoint_root: Option<PathBuf>,
    memory_service: Option<Arc<dyn MemoryService>>,
    memory_policy: MemoryUpdatePolicy,
    memory_queue_capacity: usize,
    provider: Option<Arc<dyn ModelProvider>>,
}

impl SkeinBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            checkpoint_store: None,
            checkpoint_root: None,
            memory_service: None,
            memory_policy: MemoryUpdatePolicy::default(),
            memory_queue_capacity: DEFAULT_MEMORY_QUEUE_CAPACITY,
            provider: None,
        }
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Persist checkpoints as JSON files under `root`.
    pub fn file_checkpoints(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = Some(root.into());
        self
    }

    pub fn memory_service(mut self, service: Arc<dyn MemoryService>) -> Self {
        self.memory_service = Some(service);
        self
    }

    pub fn memory_policy(mut self, policy: MemoryUpdatePolicy) -> Self {
        self.memory_policy = policy;
        self
    }

    pub fn memory_queue_capacity(mut self, capacity: usize) -> Self {
        self.memory_queue_capacity = capacity;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Construct the shared services. Must run inside a tokio runtime when a
    /// memory service is configured.
    pub fn build(self) -> Skein {
        let checkpoint_store: Arc<dyn CheckpointStore> =
            match (self.checkpoint_store, self.checkpoint_root) {
                (Some(store), _) => store,
                (None, Some(root)) => Arc::new(FileCheckpointStore::new(root)),
                (None, None) => Arc::new(InMemoryCheckpointStore::new()),
            };
        let memory = self
            .memory_service
            .map(|service| Arc::new(MemoryUpdater::spawn(service, self.memory_queue_capacity)));
        info!(
            app_name = %self.app_name,
            memory = memory.is_some(),
            memory_policy = ?self.memory_policy,
            "skein services ready"
        );

        Skein {
            app_name: self.app_name,
            checkpoint_store,
            memory,
            memory_policy: self.memory_policy,
            provider: self.provider,
        }
    }
}

#[derive(Clone)]
pub struct Skein {
    app_name: String,
    checkpoint_store: Arc<dyn CheckpointStore>,
    memory: Option<Arc<MemoryUpdater>>,
    memory_policy: MemoryUpdatePolicy,
    provider: Option<Arc<dyn ModelProvider>>,
}

impl Skein {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        self.checkpoint_store.clone()
    }

    /// Start an agent definition on the shared provider.
    pub fn agent(
        &self,
        name: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<DefaultAgentBuilder> {
        let provider = self
            .provider
            .clone()
            .context("no model provider configured")?;
        Ok(DefaultAgent::builder(name, model, provider))
    }

    /// Runner for `agent` wired to the shared checkpoint store and memory.
    pub fn runner(&self, agent: Arc<dyn Agent>) -> Runner {
        let runner = Runner::new(&self.app_name, agent)
            .with_checkpoint_store(self.checkpoint_store.clone());
        match &self.memory {
            Some(memory) => runner.with_memory(memory.clone(), self.memory_policy),
            None => runner,
        }
    }

    #[instrument(skip(self), fields(app_name = %self.app_name))]
    pub async fn checkpoint(&self, checkpoint_id: &CheckpointId) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoint_store
            .get_checkpoint(&self.app_name, checkpoint_id)
            .await?)
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.checkpoint_store.list_checkpoints(&self.app_name).await?)
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &CheckpointId) -> Result<()> {
        Ok(self
            .checkpoint_store
            .delete_checkpoint(&self.app_name, checkpoint_id)
            .await?)
    }

    pub async fn search_memory(&self, user_id: &UserId, query: &str) -> Result<SearchMemoryResponse> {
        let memory = self.memory.as_ref().context("no memory service configured")?;
        Ok(memory.service().search_memory(user_id, query).await?)
    }

    /// Wait for queued memory updates to finish.
    pub async fn shutdown(&self) {
        if let Some(memory) = &self.memory {
            memory.shutdown().await;
        }
        info!(app_name = %self.app_name, "skein shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use skein_memory::InMemoryMemoryService;
    use skein_protocol::{
        ChatCompletionChunk, ChatRequest, ChunkStream, EventKind, MemoryUpdatePolicy, Message,
        ModelProvider, Role, SkeinResult,
    };
    use skein_runtime::RunRequest;
    use std::sync::Arc;
    use tokio::fs;

    use crate::SkeinBuilder;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    /// Replies with the last user message, upper-cased.
    struct ShoutProvider;

    #[async_trait]
    impl ModelProvider for ShoutProvider {
        fn name(&self) -> &str {
            "shout"
        }

        async fn stream_chat(&self, request: ChatRequest) -> SkeinResult<ChunkStream> {
            let reply = request
                .messages
                .iter()
                .rev()
                .find(|message| message.role == Role::User)
                .map(|message| message.content.text().to_uppercase())
                .unwrap_or_default();
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                ChatCompletionChunk::text(reply),
            )])))
        }
    }

    #[tokio::test]
    async fn file_backed_turns_survive_a_rebuild() -> Result<()> {
        let root = unique_test_root("skein-kernel-files");
        let skein = SkeinBuilder::new("app1")
            .file_checkpoints(&root)
            .provider(Arc::new(ShoutProvider))
            .build();
        let agent = Arc::new(skein.agent("Shouter", "test-model")?.build());

        let events: Vec<_> = skein
            .runner(agent.clone())
            .run(
                RunRequest::new("u1")
                    .with_checkpoint_id("c1")
                    .with_messages(vec![Message::user("hello")]),
            )
            .collect()
            .await;
        assert!(events.iter().any(
            |event| matches!(&event.kind, EventKind::OutputText { delta } if delta == "HELLO")
        ));

        let rebuilt = SkeinBuilder::new("app1").file_checkpoints(&root).build();
        let checkpoint = rebuilt
            .checkpoint(&"c1".into())
            .await?
            .expect("checkpoint on disk");
        assert_eq!(checkpoint.state.message_count(), 2);
        assert_eq!(rebuilt.list_checkpoints().await?.len(), 1);

        rebuilt.delete_checkpoint(&"c1".into()).await?;
        assert!(rebuilt.checkpoint(&"c1".into()).await?.is_none());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn memory_queue_drains_on_shutdown() -> Result<()> {
        let skein = SkeinBuilder::new("app1")
            .memory_service(Arc::new(InMemoryMemoryService::default()))
            .memory_policy(MemoryUpdatePolicy::NonBlocking)
            .memory_queue_capacity(1)
            .provider(Arc::new(ShoutProvider))
            .build();
        let agent = Arc::new(skein.agent("Shouter", "test-model")?.build());

        let _: Vec<_> = skein
            .runner(agent)
            .run(RunRequest::new("u1").with_messages(vec![Message::user("trains")]))
            .collect()
            .await;
        skein.shutdown().await;

        let response = skein.search_memory(&"u1".into(), "trains").await?;
        assert!(response.content().contains("user: trains"));
        assert!(response.content().contains("assistant: TRAINS"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_services_are_reported() -> Result<()> {
        let skein = SkeinBuilder::new("app1").build();
        assert!(skein.agent("A", "m").is_err());
        assert!(skein.search_memory(&"u1".into(), "q").await.is_err());
        assert!(skein.list_checkpoints().await?.is_empty());
        Ok(())
    }
}
