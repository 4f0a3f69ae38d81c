//! axon-agent: the conversational agent runtime core.
//!
//! Ties the provider, memory manager, tool executor, and todo service
//! into the per-session agent loop, with an admission queue and
//! middleware pipeline on the dispatch path.

pub mod agent;
pub mod dispatcher;
pub mod interrupt;
pub mod pipeline;
pub mod queue;
pub mod todo;

pub use agent::{AgentLoop, ChunkStream};
pub use dispatcher::Dispatcher;
pub use interrupt::InterruptRegistry;
pub use pipeline::{
    default_pipeline, LoggingMiddleware, Middleware, Next, Pipeline, PipelineContext,
    PipelineHandler, RateLimitMiddleware, RetryMiddleware, TimingMiddleware,
    ValidationMiddleware,
};
pub use queue::{MemoryQueueBackend, PriorityMessageQueue, QueueBackend};
pub use todo::{normalize_status, TodoBroadcast, TodoService};
