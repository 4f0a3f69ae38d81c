//! axon-llm: chat-completions provider abstraction for the axon runtime.
//!
//! Exposes the `ChatProvider` trait, an OpenAI-compatible HTTP/SSE client,
//! the streaming tool-call assembler, and a scripted mock provider used
//! throughout the workspace's tests.

pub mod assemble;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod types;

pub use assemble::{parse_lenient_json, ToolCallAssembler};
pub use mock::{MockBehavior, MockProvider};
pub use openai::OpenAiProvider;
pub use provider::{ChatProvider, ChatStream, LlmError, LlmResult};
pub use types::{
    ChatCompletion, ChatContent, ChatMessage, ChatRequest, ContentPart, StreamDelta,
    ToolFunctionSpec, ToolSpec,
};
