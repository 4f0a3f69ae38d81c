//! Error types for the axon runtime

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("user message is empty")]
    EmptyMessage,

    #[error("session busy: {0} already has an active run")]
    SessionBusy(Uuid),

    #[error("reached max tool iterations ({0}) without completion")]
    MaxIterations(u32),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("tool error: {name} - {message}")]
    Tool { name: String, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("queue is full")]
    QueueFull,

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
