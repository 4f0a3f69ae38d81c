//! axon-core: domain types, errors, and configuration for the axon
//! conversational agent runtime.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AgentConfig, LlmConfig, MemoryConfig, QueueConfig, RuntimeConfig, SandboxConfig, ToolsConfig,
};
pub use error::{Error, Result};
pub use types::{
    ChatResponse, ChunkType, ContentBlock, FunctionCall, ImageUrl, Message, MessageContent,
    QueuedMessage, Role, Session, SessionInfo, SessionStatus, StreamChunk, TodoItem,
    TodoItemStatus, TodoList, TodoListStatus, TokenUsage, ToolCall,
};
