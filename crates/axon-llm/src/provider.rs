//! Chat provider trait

use crate::types::{ChatCompletion, ChatRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Stream type for chat responses
pub type ChatStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// A chat-completions provider. Implementations must be cheap to share
/// (`Arc`) and safe to call concurrently; the runtime constructs exactly
/// one per process.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One buffered completion.
    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatCompletion>;

    /// One streaming completion. Dropping the returned stream closes the
    /// underlying connection.
    async fn chat_stream(&self, request: ChatRequest) -> LlmResult<ChatStream>;
}
