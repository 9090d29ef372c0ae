//! # skein-protocol
//!
//! Shared types, event taxonomy, and port traits for the skein agent
//! runtime. This crate has no async runtime dependency so it can be used as
//! a pure contract crate by providers, stores and clients.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (EventId, CheckpointId, ContextId, UserId, ...)
//! - [`message`]: Chat messages, content parts, tool calls
//! - [`event`]: Event envelope + EventKind, ContextInterruption
//! - [`state`]: Conversation State and model-call parameters
//! - [`checkpoint`]: Persisted Checkpoint
//! - [`tool`]: Tool descriptors
//! - [`memory`]: Memory snippets and update policy
//! - [`chunk`]: Provider streaming chunk shapes
//! - [`wire`]: Event to client chunk conversion
//! - [`ports`]: Model provider, checkpoint store, memory service
//! - [`error`]: SkeinError, SkeinResult

pub mod checkpoint;
pub mod chunk;
pub mod error;
pub mod event;
pub mod ids;
pub mod memory;
pub mod message;
pub mod ports;
pub mod state;
pub mod tool;
pub mod wire;

pub use checkpoint::{Checkpoint, checkpoint_key, checkpoint_key_prefix};
pub use chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta};
pub use error::{SkeinError, SkeinResult};
pub use event::{ContextInterruption, Event, EventKind, LifeCycle};
pub use ids::{CheckpointId, ContextId, EventId, SessionId, UserId};
pub use memory::{Memory, MemoryUpdatePolicy, SearchMemoryResponse};
pub use message::{ContentPart, FunctionCall, ImageUrl, Message, MessageContent, Role, ToolCall};
pub use ports::{
    ChatRequest, CheckpointStore, ChunkStream, ContextChatRequest, ContextRequest, MemoryService,
    ModelProvider,
};
pub use state::{ChatParameters, ContextMode, ContextParameters, State, TruncationStrategy};
pub use tool::{FunctionTool, ToolDescriptor};
pub use wire::{ActionDetail, BotChunk, BotUsage, ToolDetail, event_to_chunk};
