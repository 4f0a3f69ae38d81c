//! Storage traits: the persistence seam of the runtime.
//!
//! The runtime only ever talks to these traits; the relational layout
//! behind them is an implementation detail.

use axon_core::{Message, Result, Session, TodoItem, TodoItemStatus, TodoList};
use uuid::Uuid;

/// Persistence for sessions and their messages.
///
/// Implementations must be thread-safe; every mutation runs in its own
/// transaction.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a newly created session together with any seed messages.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Load a session with all of its messages.
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Append one message to an existing session and bump `updated_at`.
    async fn save_message(&self, session_id: Uuid, message: &Message) -> Result<()>;

    /// Update session-level scalar fields (title, status, counters, summary).
    async fn update_session(&self, session: &Session) -> Result<()>;

    /// Delete a session; messages and the todo list cascade.
    async fn delete_session(&self, session_id: Uuid) -> Result<bool>;

    /// Paginated listing, most recently updated first. Pages are 1-based.
    async fn list_sessions(&self, page: usize, page_size: usize)
        -> Result<(Vec<Session>, usize)>;

    /// Replace the whole message sequence of a session (compression path),
    /// optionally updating the summary in the same transaction.
    async fn replace_session_messages(
        &self,
        session_id: Uuid,
        messages: &[Message],
        summary: Option<&str>,
    ) -> Result<()>;
}

/// Persistence for the per-session todo list (at most one per session).
///
/// Every mutator commits atomically and returns the fresh snapshot so the
/// caller can broadcast it immediately.
#[async_trait::async_trait]
pub trait TodoStore: Send + Sync {
    async fn get_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>>;

    /// Delete any existing list and create a new one, numbering items by
    /// declared order starting at 1. A fresh list starts at revision 1; a
    /// replace continues the session's revision sequence so snapshots stay
    /// strictly monotonic.
    async fn create_or_replace(
        &self,
        session_id: Uuid,
        title: &str,
        items: Vec<TodoItem>,
    ) -> Result<TodoList>;

    /// Set one item's status; bumps revision.
    async fn set_item_status(
        &self,
        session_id: Uuid,
        item_id: &str,
        status: TodoItemStatus,
    ) -> Result<TodoList>;

    /// Mark the running item completed and promote the next pending item;
    /// bumps revision once.
    async fn advance_step(&self, session_id: Uuid) -> Result<TodoList>;

    /// Mark every item (and the list) completed; bumps revision.
    async fn complete_all(&self, session_id: Uuid) -> Result<TodoList>;

    /// Remove the list entirely.
    async fn clear(&self, session_id: Uuid) -> Result<()>;
}
