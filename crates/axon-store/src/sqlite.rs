//! SQLite-backed stores over a shared connection pool

use crate::store::{SessionStore, TodoStore};
use axon_core::{
    Error, Message, MessageContent, Result, Role, Session, SessionStatus, TodoItem,
    TodoItemStatus, TodoList, TodoListStatus, ToolCall,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                TEXT PRIMARY KEY,
    title             TEXT,
    status            TEXT NOT NULL,
    current_iteration INTEGER NOT NULL DEFAULT 0,
    prompt_tokens     INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens      INTEGER NOT NULL DEFAULT 0,
    summary           TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY,
    session_id       TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role             TEXT NOT NULL,
    content          TEXT NOT NULL,
    name             TEXT,
    tool_calls       TEXT,
    tool_call_id     TEXT,
    importance_score REAL NOT NULL DEFAULT 1.0,
    token_count      INTEGER NOT NULL DEFAULT 0,
    is_compressed    INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

CREATE TABLE IF NOT EXISTS todo_lists (
    id         TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE,
    title      TEXT NOT NULL,
    revision   INTEGER NOT NULL DEFAULT 1,
    status     TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS todo_items (
    id           TEXT PRIMARY KEY,
    todo_list_id TEXT NOT NULL REFERENCES todo_lists(id) ON DELETE CASCADE,
    label        TEXT NOT NULL,
    status       TEXT NOT NULL,
    order_index  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_todo_items_list ON todo_items(todo_list_id);
"#;

/// One pool, both stores. Clone is cheap (pool handle).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect (creating the file if needed) and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::store(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests and store-backed unit runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::store(e.to_string()))?
            .foreign_keys(true);

        // A :memory: database exists per connection; a single-connection
        // pool keeps every query on the same database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(err: sqlx::Error) -> Error {
    Error::store(err.to_string())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::store(format!("bad uuid {raw}: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::store(format!("bad timestamp {raw}: {e}")))
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(Error::store(format!("unknown role {other}"))),
    }
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Processing => "processing",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Interrupted => "interrupted",
    }
}

fn parse_session_status(raw: &str) -> Result<SessionStatus> {
    match raw {
        "pending" => Ok(SessionStatus::Pending),
        "processing" => Ok(SessionStatus::Processing),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "interrupted" => Ok(SessionStatus::Interrupted),
        other => Err(Error::store(format!("unknown session status {other}"))),
    }
}

fn item_status_str(status: TodoItemStatus) -> &'static str {
    match status {
        TodoItemStatus::Pending => "pending",
        TodoItemStatus::Running => "running",
        TodoItemStatus::Completed => "completed",
    }
}

fn parse_item_status(raw: &str) -> Result<TodoItemStatus> {
    match raw {
        "pending" => Ok(TodoItemStatus::Pending),
        "running" => Ok(TodoItemStatus::Running),
        "completed" => Ok(TodoItemStatus::Completed),
        other => Err(Error::store(format!("unknown todo status {other}"))),
    }
}

fn list_status_str(status: TodoListStatus) -> &'static str {
    match status {
        TodoListStatus::Active => "active",
        TodoListStatus::Completed => "completed",
    }
}

fn parse_list_status(raw: &str) -> Result<TodoListStatus> {
    match raw {
        "active" => Ok(TodoListStatus::Active),
        "completed" => Ok(TodoListStatus::Completed),
        other => Err(Error::store(format!("unknown list status {other}"))),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let content_raw: String = row.try_get("content").map_err(store_err)?;
    let content: MessageContent = serde_json::from_str(&content_raw)?;

    let tool_calls: Option<Vec<ToolCall>> = row
        .try_get::<Option<String>, _>("tool_calls")
        .map_err(store_err)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    let id: String = row.try_get("id").map_err(store_err)?;
    let role: String = row.try_get("role").map_err(store_err)?;
    let created_at: String = row.try_get("created_at").map_err(store_err)?;

    Ok(Message {
        id: parse_uuid(&id)?,
        role: parse_role(&role)?,
        content,
        name: row.try_get("name").map_err(store_err)?,
        tool_calls,
        tool_call_id: row.try_get("tool_call_id").map_err(store_err)?,
        importance_score: row.try_get("importance_score").map_err(store_err)?,
        token_count: row.try_get::<i64, _>("token_count").map_err(store_err)? as u32,
        is_compressed: row.try_get::<i64, _>("is_compressed").map_err(store_err)? != 0,
        created_at: parse_time(&created_at)?,
    })
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id").map_err(store_err)?;
    let status: String = row.try_get("status").map_err(store_err)?;
    let created_at: String = row.try_get("created_at").map_err(store_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(store_err)?;

    Ok(Session {
        id: parse_uuid(&id)?,
        title: row.try_get("title").map_err(store_err)?,
        messages: Vec::new(),
        status: parse_session_status(&status)?,
        current_iteration: row.try_get::<i64, _>("current_iteration").map_err(store_err)? as u32,
        prompt_tokens: row.try_get::<i64, _>("prompt_tokens").map_err(store_err)? as u64,
        completion_tokens: row.try_get::<i64, _>("completion_tokens").map_err(store_err)? as u64,
        total_tokens: row.try_get::<i64, _>("total_tokens").map_err(store_err)? as u64,
        summary: row.try_get("summary").map_err(store_err)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

async fn insert_message<'e, E>(executor: E, session_id: Uuid, message: &Message) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let tool_calls = message
        .tool_calls
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO messages (id, session_id, role, content, name, tool_calls, tool_call_id, \
         importance_score, token_count, is_compressed, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.id.to_string())
    .bind(session_id.to_string())
    .bind(role_str(message.role))
    .bind(serde_json::to_string(&message.content)?)
    .bind(&message.name)
    .bind(tool_calls)
    .bind(&message.tool_call_id)
    .bind(message.importance_score)
    .bind(message.token_count as i64)
    .bind(message.is_compressed as i64)
    .bind(message.created_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(store_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "INSERT INTO sessions (id, title, status, current_iteration, prompt_tokens, \
             completion_tokens, total_tokens, summary, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(&session.title)
        .bind(session_status_str(session.status))
        .bind(session.current_iteration as i64)
        .bind(session.prompt_tokens as i64)
        .bind(session.completion_tokens as i64)
        .bind(session.total_tokens as i64)
        .bind(&session.summary)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        for message in &session.messages {
            insert_message(&mut *tx, session.id, message).await?;
        }

        tx.commit().await.map_err(store_err)?;
        debug!(session_id = %session.id, "session persisted");
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };
        let mut session = session_from_row(&row)?;

        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY rowid")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        session.messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(session))
    }

    async fn save_message(&self, session_id: Uuid, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        insert_message(&mut *tx, session_id, message).await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET title = ?, status = ?, current_iteration = ?, \
             prompt_tokens = ?, completion_tokens = ?, total_tokens = ?, summary = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&session.title)
        .bind(session_status_str(session.status))
        .bind(session.current_iteration as i64)
        .bind(session.prompt_tokens as i64)
        .bind(session.completion_tokens as i64)
        .bind(session.total_tokens as i64)
        .bind(&session.summary)
        .bind(Utc::now().to_rfc3339())
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // The todo list is keyed by session id without a hard FK; cascade
        // it explicitly inside the same transaction.
        sqlx::query(
            "DELETE FROM todo_items WHERE todo_list_id IN \
             (SELECT id FROM todo_lists WHERE session_id = ?)",
        )
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM todo_lists WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!(session_id = %session_id, "session deleted");
        }
        Ok(deleted)
    }

    async fn list_sessions(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Session>, usize)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?
            .try_get("n")
            .map_err(store_err)?;

        let page = page.max(1);
        let offset = (page - 1) * page_size;

        let rows = sqlx::query(
            "SELECT * FROM sessions ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = session_from_row(row)?;
            let message_rows =
                sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY rowid")
                    .bind(session.id.to_string())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(store_err)?;
            session.messages = message_rows
                .iter()
                .map(message_from_row)
                .collect::<Result<Vec<_>>>()?;
            sessions.push(session);
        }

        Ok((sessions, total as usize))
    }

    async fn replace_session_messages(
        &self,
        session_id: Uuid,
        messages: &[Message],
        summary: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for message in messages {
            insert_message(&mut *tx, session_id, message).await?;
        }

        if let Some(summary) = summary {
            sqlx::query("UPDATE sessions SET summary = ?, updated_at = ? WHERE id = ?")
                .bind(summary)
                .bind(Utc::now().to_rfc3339())
                .bind(session_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        debug!(
            session_id = %session_id,
            new_count = messages.len(),
            "session messages replaced after compression"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TodoStore
// ---------------------------------------------------------------------------

impl SqliteStore {
    async fn load_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>> {
        let row = sqlx::query("SELECT * FROM todo_lists WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };

        let list_id: String = row.try_get("id").map_err(store_err)?;
        let status: String = row.try_get("status").map_err(store_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(store_err)?;

        let item_rows = sqlx::query(
            "SELECT * FROM todo_items WHERE todo_list_id = ? ORDER BY order_index",
        )
        .bind(&list_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut items = Vec::with_capacity(item_rows.len());
        for item_row in &item_rows {
            let status: String = item_row.try_get("status").map_err(store_err)?;
            items.push(TodoItem {
                id: item_row.try_get("id").map_err(store_err)?,
                label: item_row.try_get("label").map_err(store_err)?,
                status: parse_item_status(&status)?,
                order_index: item_row.try_get::<i64, _>("order_index").map_err(store_err)? as u32,
            });
        }

        Ok(Some(TodoList {
            id: list_id,
            title: row.try_get("title").map_err(store_err)?,
            revision: row.try_get::<i64, _>("revision").map_err(store_err)? as u32,
            status: parse_list_status(&status)?,
            updated_at: parse_time(&updated_at)?,
            items,
        }))
    }

    async fn persist_snapshot(&self, session_id: Uuid, list: &TodoList) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "UPDATE todo_lists SET revision = ?, status = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(list.revision as i64)
        .bind(list_status_str(list.status))
        .bind(list.updated_at.to_rfc3339())
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        for item in &list.items {
            sqlx::query("UPDATE todo_items SET status = ? WHERE id = ?")
                .bind(item_status_str(item.status))
                .bind(&item.id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)
    }

    async fn mutate_todo_list<F>(&self, session_id: Uuid, mutate: F) -> Result<TodoList>
    where
        F: FnOnce(&mut TodoList),
    {
        let mut list = self
            .load_todo_list(session_id)
            .await?
            .ok_or_else(|| Error::store(format!("no todo list for session {session_id}")))?;

        mutate(&mut list);
        list.revision += 1;
        list.updated_at = Utc::now();

        self.persist_snapshot(session_id, &list).await?;
        Ok(list)
    }
}

#[async_trait::async_trait]
impl TodoStore for SqliteStore {
    async fn get_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>> {
        self.load_todo_list(session_id).await
    }

    async fn create_or_replace(
        &self,
        session_id: Uuid,
        title: &str,
        items: Vec<TodoItem>,
    ) -> Result<TodoList> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // A replace stays on the session's monotonic revision line; only a
        // genuinely new list starts at 1.
        let revision: u32 = sqlx::query("SELECT revision FROM todo_lists WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?
            .map(|row| row.try_get::<i64, _>("revision").map(|r| r as u32 + 1))
            .transpose()
            .map_err(store_err)?
            .unwrap_or(1);

        sqlx::query(
            "DELETE FROM todo_items WHERE todo_list_id IN \
             (SELECT id FROM todo_lists WHERE session_id = ?)",
        )
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM todo_lists WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let now = Utc::now();
        let list_id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO todo_lists (id, session_id, title, revision, status, updated_at) \
             VALUES (?, ?, ?, ?, 'active', ?)",
        )
        .bind(&list_id)
        .bind(session_id.to_string())
        .bind(title)
        .bind(revision as i64)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        let mut stored_items = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let order_index = (idx + 1) as u32;
            sqlx::query(
                "INSERT INTO todo_items (id, todo_list_id, label, status, order_index) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&list_id)
            .bind(&item.label)
            .bind(item_status_str(item.status))
            .bind(order_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            stored_items.push(TodoItem { order_index, ..item });
        }

        tx.commit().await.map_err(store_err)?;
        debug!(
            session_id = %session_id,
            item_count = stored_items.len(),
            revision,
            "todo list created"
        );

        Ok(TodoList {
            id: list_id,
            title: title.to_string(),
            revision,
            status: TodoListStatus::Active,
            updated_at: now,
            items: stored_items,
        })
    }

    async fn set_item_status(
        &self,
        session_id: Uuid,
        item_id: &str,
        status: TodoItemStatus,
    ) -> Result<TodoList> {
        let current = self
            .load_todo_list(session_id)
            .await?
            .ok_or_else(|| Error::store(format!("no todo list for session {session_id}")))?;
        if !current.items.iter().any(|i| i.id == item_id) {
            return Err(Error::store(format!(
                "todo item {item_id} not found in session {session_id}"
            )));
        }

        self.mutate_todo_list(session_id, |list| {
            for item in &mut list.items {
                if item.id == item_id {
                    item.status = status;
                    break;
                }
            }
        })
        .await
    }

    async fn advance_step(&self, session_id: Uuid) -> Result<TodoList> {
        self.mutate_todo_list(session_id, |list| {
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
        .await
    }

    async fn complete_all(&self, session_id: Uuid) -> Result<TodoList> {
        self.mutate_todo_list(session_id, |list| {
            for item in &mut list.items {
                item.status = TodoItemStatus::Completed;
            }
            list.status = TodoListStatus::Completed;
        })
        .await
    }

    async fn clear(&self, session_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "DELETE FROM todo_items WHERE todo_list_id IN \
             (SELECT id FROM todo_lists WHERE session_id = ?)",
        )
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM todo_lists WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)
    }
}
