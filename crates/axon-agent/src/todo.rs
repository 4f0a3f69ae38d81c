//! TodoService - revisioned per-session plan state
//!
//! Sits between the `manage_todo_list` tool call and the todo store.
//! Parses the model's arguments leniently (providers disagree on key
//! names), enforces the one-running-item rule, and broadcasts a full
//! snapshot after every mutation.

use axon_core::{Result, StreamChunk, TodoItem, TodoItemStatus, TodoList};
use axon_llm::parse_lenient_json;
use axon_store::TodoStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Snapshot broadcast callback; invoked inline after each mutation.
pub type TodoBroadcast = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Key aliases different models use for the item list.
const ITEMS_KEYS: &[&str] = &["items", "todoList", "todo_list", "steps"];
/// Key aliases for an item's label.
const LABEL_KEYS: &[&str] = &["label", "title", "name", "text", "description", "content"];
/// Key aliases for an item's status.
const STATUS_KEYS: &[&str] = &["status", "state"];

pub struct TodoService {
    store: Arc<dyn TodoStore>,
}

impl TodoService {
    pub fn new(store: Arc<dyn TodoStore>) -> Self {
        Self { store }
    }

    /// Process one `manage_todo_list` call. Returns the confirmation
    /// string fed back to the model as the tool result. Never errors on
    /// malformed arguments; those materialize in the returned JSON.
    pub async fn handle_tool_call(
        &self,
        session_id: Uuid,
        raw_arguments: &str,
        broadcast: Option<&TodoBroadcast>,
    ) -> String {
        let args = match parse_lenient_json(raw_arguments) {
            Ok(args) => args,
            Err(_) => return r#"{"ok":false,"error":"Invalid JSON arguments"}"#.to_string(),
        };
        debug!(session_id = %session_id, raw = raw_arguments, "manage_todo_list call");

        let title = args.get("title").and_then(Value::as_str).unwrap_or("");
        let items = parse_items(&args);
        let item_count = items.len();

        match self.store.create_or_replace(session_id, title, items).await {
            Ok(snapshot) => {
                let revision = snapshot.revision;
                Self::broadcast(session_id, snapshot, broadcast);
                serde_json::json!({
                    "ok": true,
                    "message": format!(
                        "Todo list '{title}' saved with {item_count} items (revision {revision})."
                    ),
                })
                .to_string()
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "todo list write failed");
                serde_json::json!({"ok": false, "error": err.to_string()}).to_string()
            }
        }
    }

    /// Mark the running item completed and promote the next pending one.
    pub async fn advance_step(
        &self,
        session_id: Uuid,
        broadcast: Option<&TodoBroadcast>,
    ) -> Result<TodoList> {
        let snapshot = self.store.advance_step(session_id).await?;
        Self::broadcast(session_id, snapshot.clone(), broadcast);
        Ok(snapshot)
    }

    pub async fn set_item_status(
        &self,
        session_id: Uuid,
        item_id: &str,
        status: TodoItemStatus,
        broadcast: Option<&TodoBroadcast>,
    ) -> Result<TodoList> {
        let snapshot = self.store.set_item_status(session_id, item_id, status).await?;
        Self::broadcast(session_id, snapshot.clone(), broadcast);
        Ok(snapshot)
    }

    pub async fn complete_all(
        &self,
        session_id: Uuid,
        broadcast: Option<&TodoBroadcast>,
    ) -> Result<TodoList> {
        let snapshot = self.store.complete_all(session_id).await?;
        Self::broadcast(session_id, snapshot.clone(), broadcast);
        Ok(snapshot)
    }

    pub async fn clear(&self, session_id: Uuid) -> Result<()> {
        self.store.clear(session_id).await
    }

    /// Read-only fetch; no broadcast.
    pub async fn get_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>> {
        self.store.get_todo_list(session_id).await
    }

    fn broadcast(session_id: Uuid, snapshot: TodoList, broadcast: Option<&TodoBroadcast>) {
        if let Some(broadcast) = broadcast {
            broadcast(StreamChunk::todo_list(session_id, snapshot));
        }
    }
}

/// Extract items from whichever alias key the model used, normalizing
/// label/status per item and enforcing exactly one running item.
fn parse_items(args: &Value) -> Vec<TodoItem> {
    let raw_items = ITEMS_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default();

    let mut items: Vec<TodoItem> = raw_items
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            TodoItem::new(extract_label(raw), extract_status(raw), (idx + 1) as u32)
        })
        .collect();

    // At most one running item: the first one wins, extras fall back to
    // pending. If the model supplied none, promote the first pending.
    let mut seen_running = false;
    for item in &mut items {
        if item.status == TodoItemStatus::Running {
            if seen_running {
                item.status = TodoItemStatus::Pending;
            }
            seen_running = true;
        }
    }
    if !seen_running {
        if let Some(first_pending) = items
            .iter_mut()
            .find(|i| i.status == TodoItemStatus::Pending)
        {
            first_pending.status = TodoItemStatus::Running;
        }
    }

    items
}

fn extract_label(item: &Value) -> String {
    if let Some(text) = item.as_str() {
        return text.to_string();
    }
    for key in LABEL_KEYS {
        if let Some(label) = item.get(*key).and_then(Value::as_str) {
            if !label.is_empty() {
                return label.to_string();
            }
        }
    }
    item.to_string()
}

fn extract_status(item: &Value) -> TodoItemStatus {
    let raw = STATUS_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or("pending");
    normalize_status(raw)
}

/// Map the status strings various models emit onto the three canonical
/// states. Unknown strings default to pending.
pub fn normalize_status(raw: &str) -> TodoItemStatus {
    match raw.trim().to_lowercase().as_str() {
        "pending" | "not-started" | "not_started" | "todo" => TodoItemStatus::Pending,
        "running" | "in-progress" | "in_progress" | "active" | "current" => {
            TodoItemStatus::Running
        }
        "completed" | "done" | "finished" | "complete" => TodoItemStatus::Completed,
        _ => TodoItemStatus::Pending,
    }
}
