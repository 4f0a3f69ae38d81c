//! Core domain types for the axon agent runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Session / run lifecycle status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Interrupted,
}

/// A tool call emitted by the assistant, in the chat-completions shape.
/// `arguments` is the raw JSON string exactly as the provider produced it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Image reference carried in an `image_url` content block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A single block inside a multi-part message body.
///
/// Only `Text` and `ImageUrl` contribute to the rendered LLM input; the
/// remaining variants carry runtime metadata alongside the transcript.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    ToolCall { data: serde_json::Value },
    ToolResult { data: serde_json::Value },
    Thinking { text: String },
}

/// Message content - a plain string or an ordered block sequence
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of the renderable parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Base importance in [0, 1]; feeds the compression scorer.
    pub importance_score: f64,
    /// Token cost of the LLM-rendered form, computed at append time.
    pub token_count: u32,
    pub is_compressed: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            importance_score: 1.0,
            token_count: 0,
            is_compressed: false,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tools(
        content: impl Into<MessageContent>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        if !tool_calls.is_empty() {
            msg.tool_calls = Some(tool_calls);
        }
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// A conversation session - the unit of concurrency isolation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub current_iteration: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: None,
            messages: Vec::new(),
            status: SessionStatus::Pending,
            current_iteration: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Append a compression summary to the running session summary,
    /// separated by a blank line.
    pub fn append_summary(&mut self, summary: &str) {
        match &mut self.summary {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(summary);
            }
            None => self.summary = Some(summary.to_string()),
        }
        self.updated_at = Utc::now();
    }

    /// Preview of the most recent textual message, capped at 100 chars.
    pub fn preview(&self) -> Option<String> {
        self.messages.last().map(|m| {
            let text = m.content.text();
            text.chars().take(100).collect()
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing row for `list_sessions`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub title: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl SessionInfo {
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id,
            title: session.title.clone(),
            message_count: session.messages.len(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            status: session.status,
            preview: session.preview(),
        }
    }
}

/// Accumulated token usage for one run.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Final response of a buffered run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub message: Message,
    pub status: SessionStatus,
    pub usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// Todo list
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TodoItemStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TodoListStatus {
    Active,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TodoItem {
    pub id: String,
    pub label: String,
    pub status: TodoItemStatus,
    pub order_index: u32,
}

impl TodoItem {
    pub fn new(label: impl Into<String>, status: TodoItemStatus, order_index: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            status,
            order_index,
        }
    }
}

/// Full, revision-stamped todo list snapshot - the unit of broadcast.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    pub title: String,
    pub revision: u32,
    pub status: TodoListStatus,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<TodoItem>,
}

impl TodoList {
    pub fn new(title: impl Into<String>, items: Vec<TodoItem>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            revision: 1,
            status: TodoListStatus::Active,
            updated_at: Utc::now(),
            items,
        }
    }

    pub fn running_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == TodoItemStatus::Running)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Stream chunks
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Session,
    Thinking,
    Content,
    ToolCall,
    TodoList,
    Done,
    Error,
}

/// One chunk of a streamed run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub delta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todo_list: Option<TodoList>,
    #[serde(default)]
    pub is_thinking_complete: bool,
}

impl StreamChunk {
    fn base(session_id: Uuid, chunk_type: ChunkType) -> Self {
        Self {
            session_id,
            chunk_type,
            delta: String::new(),
            thinking: None,
            tool_calls: None,
            todo_list: None,
            is_thinking_complete: false,
        }
    }

    pub fn session(session_id: Uuid) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::Session);
        chunk.delta = session_id.to_string();
        chunk
    }

    pub fn content(session_id: Uuid, delta: impl Into<String>) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::Content);
        chunk.delta = delta.into();
        chunk
    }

    pub fn thinking(session_id: Uuid, thinking: impl Into<String>) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::Thinking);
        chunk.thinking = Some(thinking.into());
        chunk
    }

    pub fn todo_list(session_id: Uuid, snapshot: TodoList) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::TodoList);
        chunk.todo_list = Some(snapshot);
        chunk
    }

    pub fn done(session_id: Uuid) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::Done);
        chunk.is_thinking_complete = true;
        chunk
    }

    pub fn done_interrupted(session_id: Uuid) -> Self {
        let mut chunk = Self::done(session_id);
        chunk.delta = "[已中断]".to_string();
        chunk
    }

    pub fn error(session_id: Uuid, message: impl Into<String>) -> Self {
        let mut chunk = Self::base(session_id, ChunkType::Error);
        chunk.delta = message.into();
        chunk
    }
}

// ---------------------------------------------------------------------------
// Queue envelope
// ---------------------------------------------------------------------------

/// Admission-queue envelope. Ordering is priority-descending, FIFO within
/// equal priority (the FIFO tiebreak lives in the queue backend).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(payload: serde_json::Value, priority: u8, session_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            priority: priority.clamp(1, 9),
            session_id,
            created_at: Utc::now(),
        }
    }
}
