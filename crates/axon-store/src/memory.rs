//! In-memory stores - for tests and store-less (ephemeral) runs

use crate::store::{SessionStore, TodoStore};
use axon_core::{
    Error, Message, Result, Session, TodoItem, TodoItemStatus, TodoList, TodoListStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<Uuid, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn save_message(&self, session_id: Uuid, message: &Message) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        entry.push_message(message.clone());
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session.id)
            .ok_or(Error::SessionNotFound(session.id))?;
        entry.title = session.title.clone();
        entry.status = session.status;
        entry.current_iteration = session.current_iteration;
        entry.prompt_tokens = session.prompt_tokens;
        entry.completion_tokens = session.completion_tokens;
        entry.total_tokens = session.total_tokens;
        entry.summary = session.summary.clone();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        Ok(self.sessions.remove(&session_id).is_some())
    }

    async fn list_sessions(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Session>, usize)> {
        let mut sessions: Vec<Session> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = sessions.len();
        let page = page.max(1);
        let start = (page - 1) * page_size;
        let slice = if start >= total {
            Vec::new()
        } else {
            sessions[start..(start + page_size).min(total)].to_vec()
        };
        Ok((slice, total))
    }

    async fn replace_session_messages(
        &self,
        session_id: Uuid,
        messages: &[Message],
        summary: Option<&str>,
    ) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        entry.messages = messages.to_vec();
        if let Some(summary) = summary {
            entry.summary = Some(summary.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTodoStore {
    lists: DashMap<Uuid, TodoList>,
}

impl MemoryTodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<F>(&self, session_id: Uuid, mutate: F) -> Result<TodoList>
    where
        F: FnOnce(&mut TodoList),
    {
        let mut entry = self
            .lists
            .get_mut(&session_id)
            .ok_or_else(|| Error::store(format!("no todo list for session {session_id}")))?;
        mutate(&mut entry);
        entry.revision += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }
}

#[async_trait::async_trait]
impl TodoStore for MemoryTodoStore {
    async fn get_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>> {
        Ok(self.lists.get(&session_id).map(|l| l.clone()))
    }

    async fn create_or_replace(
        &self,
        session_id: Uuid,
        title: &str,
        items: Vec<TodoItem>,
    ) -> Result<TodoList> {
        let items = items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| TodoItem { order_index: (idx + 1) as u32, ..item })
            .collect();

        let mut list = TodoList::new(title, items);
        // A replace continues the session's revision line.
        if let Some(existing) = self.lists.get(&session_id) {
            list.revision = existing.revision + 1;
        }
        self.lists.insert(session_id, list.clone());
        Ok(list)
    }

    async fn set_item_status(
        &self,
        session_id: Uuid,
        item_id: &str,
        status: TodoItemStatus,
    ) -> Result<TodoList> {
        {
            let entry = self
                .lists
                .get(&session_id)
                .ok_or_else(|| Error::store(format!("no todo list for session {session_id}")))?;
            if !entry.items.iter().any(|i| i.id == item_id) {
                return Err(Error::store(format!(
                    "todo item {item_id} not found in session {session_id}"
                )));
            }
        }

        self.mutate(session_id, |list| {
            for item in &mut list.items {
                if item.id == item_id {
                    item.status = status;
                    break;
                }
            }
        })
    }

    async fn advance_step(&self, session_id: Uuid) -> Result<TodoList> {
        self.mutate(session_id, |list| {
            let mut promoted = false;
            for item in &mut list.items {
                match item.status {
                    TodoItemStatus::Running => item.status = TodoItemStatus::Completed,
                    TodoItemStatus::Pending if !promoted => {
                        item.status = TodoItemStatus::Running;
                        promoted = true;
                    }
                    _ => {}
                }
            }
        })
    }

    async fn complete_all(&self, session_id: Uuid) -> Result<TodoList> {
        self.mutate(session_id, |list| {
            for item in &mut list.items {
                item.status = TodoItemStatus::Completed;
            }
            list.status = TodoListStatus::Completed;
        })
    }

    async fn clear(&self, session_id: Uuid) -> Result<()> {
        self.lists.remove(&session_id);
        Ok(())
    }
}
