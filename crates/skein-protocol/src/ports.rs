//! Runtime boundary ports.
//!
//! These traits are the only seams between the event stream engine / runner
//! and external implementations: model providers, checkpoint stores and
//! memory services.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Streaming uses boxed trait objects (`ChunkStream`).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::chunk::ChatCompletionChunk;
use crate::error::{SkeinError, SkeinResult};
use crate::ids::{CheckpointId, ContextId, UserId};
use crate::memory::SearchMemoryResponse;
use crate::message::Message;
use crate::state::{ChatParameters, ContextMode, State, TruncationStrategy};
use crate::tool::FunctionTool;

pub type ChunkStream = BoxStream<'static, SkeinResult<ChatCompletionChunk>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionTool>,
    #[serde(default)]
    pub parameters: ChatParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    pub model: String,
    pub mode: ContextMode,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_strategy: Option<TruncationStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChatRequest {
    pub model: String,
    pub context_id: ContextId,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub parameters: ChatParameters,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream_chat(&self, request: ChatRequest) -> SkeinResult<ChunkStream>;

    async fn create_context(&self, _request: ContextRequest) -> SkeinResult<ContextId> {
        Err(SkeinError::Unsupported(format!(
            "{} does not support server-side contexts",
            self.name()
        )))
    }

    async fn stream_context_chat(&self, _request: ContextChatRequest) -> SkeinResult<ChunkStream> {
        Err(SkeinError::Unsupported(format!(
            "{} does not support server-side contexts",
            self.name()
        )))
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<Option<Checkpoint>>;

    /// Create a checkpoint seeded with `seed` (or an empty state). An existing
    /// checkpoint under the same key is returned untouched.
    async fn create_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        user_id: Option<UserId>,
        seed: Option<State>,
    ) -> SkeinResult<Checkpoint>;

    /// Persist `checkpoint`. The stored version must match
    /// `checkpoint.version`; on success the version is bumped in place.
    async fn update_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        checkpoint: &mut Checkpoint,
    ) -> SkeinResult<()>;

    async fn list_checkpoints(&self, app_name: &str) -> SkeinResult<Vec<Checkpoint>>;

    async fn delete_checkpoint(&self, app_name: &str, checkpoint_id: &CheckpointId)
    -> SkeinResult<()>;
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn update_memory(&self, user_id: &UserId, messages: Vec<Message>) -> SkeinResult<()>;

    async fn search_memory(&self, user_id: &UserId, query: &str)
    -> SkeinResult<SearchMemoryResponse>;

    async fn delete_user(&self, user_id: &UserId) -> SkeinResult<()>;
}
