//! MemoryManager - session lifecycle and token-accounted message flow
//!
//! Owns the per-session mutex: every mutation of a session (append,
//! compression, counter updates) goes through the entry lock, so the core
//! stays single-writer per session.

use crate::compressor::Compressor;
use crate::context::ContextWindow;
use crate::token::TokenCounter;
use axon_core::{
    Error, MemoryConfig, Message, Result, Role, Session, SessionInfo, SessionStatus, TokenUsage,
};
use axon_llm::{ChatMessage, ChatProvider};
use axon_store::SessionStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Counting runs on a blocking thread past this content size.
const BLOCKING_COUNT_THRESHOLD: usize = 65_536;

pub struct SessionEntry {
    pub session: Session,
    pub context: ContextWindow,
}

pub struct MemoryManager {
    entries: DashMap<Uuid, Arc<Mutex<SessionEntry>>>,
    store: Option<Arc<dyn SessionStore>>,
    counter: Arc<TokenCounter>,
    compressor: Compressor,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        model: &str,
        store: Option<Arc<dyn SessionStore>>,
        config: MemoryConfig,
    ) -> Result<Self> {
        let counter = Arc::new(TokenCounter::new(model)?);
        let compressor = Compressor::new(
            provider,
            counter.clone(),
            model,
            config.importance_decay_factor,
            config.summary_max_tokens,
        );

        info!(
            max_context_tokens = config.max_context_tokens,
            compression_threshold = config.compression_threshold,
            "memory manager initialized"
        );

        Ok(Self {
            entries: DashMap::new(),
            store,
            counter,
            compressor,
            config,
        })
    }

    pub fn counter(&self) -> &Arc<TokenCounter> {
        &self.counter
    }

    /// Create a session, seeding the optional system prompt as a locked,
    /// priority-10 message.
    pub async fn create_session(&self, system_prompt: Option<&str>) -> Result<Session> {
        let mut session = Session::new();
        let mut context = ContextWindow::new(self.config.max_context_tokens, self.counter.clone());

        if let Some(prompt) = system_prompt {
            let mut system_msg = Message::system(prompt);
            system_msg.token_count = self.count_tokens(&system_msg).await?;
            context.add_message(system_msg.clone(), 10, true);
            session.messages.push(system_msg);
        }

        if let Some(store) = &self.store {
            store.create_session(&session).await?;
        }

        info!(
            session_id = %session.id,
            has_system_prompt = system_prompt.is_some(),
            "session created"
        );

        self.entries.insert(
            session.id,
            Arc::new(Mutex::new(SessionEntry { session: session.clone(), context })),
        );
        Ok(session)
    }

    /// Fetch a session snapshot, hydrating from the store on a cold hit.
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        if let Some(entry) = self.entry(session_id).await? {
            let guard = entry.lock().await;
            return Ok(Some(guard.session.clone()));
        }
        Ok(None)
    }

    async fn entry(&self, session_id: Uuid) -> Result<Option<Arc<Mutex<SessionEntry>>>> {
        if let Some(entry) = self.entries.get(&session_id) {
            return Ok(Some(entry.clone()));
        }

        // Cold start: rebuild the working set from the store.
        let Some(store) = &self.store else { return Ok(None) };
        let Some(session) = store.get_session(session_id).await? else {
            return Ok(None);
        };

        let mut context = ContextWindow::new(self.config.max_context_tokens, self.counter.clone());
        for message in &session.messages {
            let priority = Self::message_priority(message);
            let lock = message.role == Role::System;
            if !context.add_message(message.clone(), priority, lock) {
                break;
            }
        }

        debug!(session_id = %session_id, "session hydrated from store");
        let entry = Arc::new(Mutex::new(SessionEntry { session, context }));
        self.entries.insert(session_id, entry.clone());
        Ok(Some(entry))
    }

    async fn required_entry(&self, session_id: Uuid) -> Result<Arc<Mutex<SessionEntry>>> {
        self.entry(session_id)
            .await?
            .ok_or(Error::SessionNotFound(session_id))
    }

    /// Append a message: tokenize, persist, insert into the context window
    /// at a role-derived priority, compressing when the insert would
    /// overflow or the usage threshold is crossed. Compression completes
    /// before this returns, so the next render always sees its result.
    pub async fn add_message(&self, session_id: Uuid, mut message: Message) -> Result<Message> {
        let entry = self.required_entry(session_id).await?;
        let mut guard = entry.lock().await;

        message.token_count = self.count_tokens(&message).await?;

        // Persist first: a store failure surfaces with no partial state.
        if let Some(store) = &self.store {
            store.save_message(session_id, &message).await?;
        }

        guard.session.push_message(message.clone());

        let priority = Self::message_priority(&message);
        let lock = message.role == Role::System;
        if !guard.context.add_message(message.clone(), priority, lock) {
            self.handle_overflow(&mut guard);
            guard.context.add_message(message.clone(), priority, lock);
        }

        if guard.context.usage_ratio() >= self.config.compression_threshold {
            self.compress_entry(session_id, &mut guard).await?;
        }

        Ok(message)
    }

    /// Render the LLM input: a synthetic system message carrying the
    /// session summary (if any), then the active messages in insertion
    /// order with their exact tool_calls / tool_call_id shapes.
    pub async fn render_for_llm(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let entry = self.required_entry(session_id).await?;
        let guard = entry.lock().await;

        let mut rendered = Vec::with_capacity(guard.session.messages.len() + 1);
        if let Some(summary) = &guard.session.summary {
            rendered.push(ChatMessage::system(format!("[Conversation summary]\n{summary}")));
        }
        for message in &guard.session.messages {
            rendered.push(ChatMessage::from_message(message));
        }
        Ok(rendered)
    }

    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let existed = self.entries.remove(&session_id).is_some();
        let stored = match &self.store {
            Some(store) => store.delete_session(session_id).await?,
            None => false,
        };
        if existed || stored {
            info!(session_id = %session_id, "session deleted");
        }
        Ok(existed || stored)
    }

    /// Paginated listing sorted by `updated_at` descending.
    pub async fn list_sessions(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<SessionInfo>, usize)> {
        if let Some(store) = &self.store {
            let (sessions, total) = store.list_sessions(page, page_size).await?;
            return Ok((sessions.iter().map(SessionInfo::from_session).collect(), total));
        }

        let mut sessions = Vec::new();
        for entry in self.entries.iter() {
            let guard = entry.value().lock().await;
            sessions.push(guard.session.clone());
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = sessions.len();
        let page = page.max(1);
        let start = (page - 1) * page_size;
        let infos = if start >= total {
            Vec::new()
        } else {
            sessions[start..(start + page_size).min(total)]
                .iter()
                .map(SessionInfo::from_session)
                .collect()
        };
        Ok((infos, total))
    }

    pub async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        self.update_fields(session_id, |session| session.status = status)
            .await
    }

    pub async fn set_title(&self, session_id: Uuid, title: &str) -> Result<()> {
        self.update_fields(session_id, |session| session.title = Some(title.to_string()))
            .await
    }

    pub async fn add_usage(&self, session_id: Uuid, usage: &TokenUsage) -> Result<()> {
        self.update_fields(session_id, |session| {
            session.prompt_tokens += usage.prompt_tokens;
            session.completion_tokens += usage.completion_tokens;
            session.total_tokens += usage.total_tokens;
        })
        .await
    }

    pub async fn set_iteration(&self, session_id: Uuid, iteration: u32) -> Result<()> {
        self.update_fields(session_id, |session| session.current_iteration = iteration)
            .await
    }

    async fn update_fields<F>(&self, session_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let entry = self.required_entry(session_id).await?;
        let mut guard = entry.lock().await;
        apply(&mut guard.session);
        guard.session.updated_at = chrono::Utc::now();

        if let Some(store) = &self.store {
            store.update_session(&guard.session).await?;
        }
        Ok(())
    }

    /// Memory statistics for one session or the whole process.
    pub async fn stats(&self, session_id: Option<Uuid>) -> Result<serde_json::Value> {
        if let Some(session_id) = session_id {
            let entry = self.required_entry(session_id).await?;
            let guard = entry.lock().await;
            return Ok(serde_json::json!({
                "session_id": session_id.to_string(),
                "message_count": guard.session.messages.len(),
                "context": guard.context.stats(),
                "has_summary": guard.session.summary.is_some(),
            }));
        }

        let mut total_messages = 0usize;
        let mut total_tokens = 0u64;
        for entry in self.entries.iter() {
            let guard = entry.value().lock().await;
            total_messages += guard.session.messages.len();
            total_tokens += guard
                .session
                .messages
                .iter()
                .map(|m| m.token_count as u64)
                .sum::<u64>();
        }
        Ok(serde_json::json!({
            "session_count": self.entries.len(),
            "total_messages": total_messages,
            "total_tokens": total_tokens,
        }))
    }

    fn message_priority(message: &Message) -> i32 {
        let mut priority = match message.role {
            Role::System => 10,
            Role::User => 7,
            Role::Assistant => 5,
            Role::Tool => 3,
        };
        if message.has_tool_calls() {
            priority += 2;
        }
        priority
    }

    async fn count_tokens(&self, message: &Message) -> Result<u32> {
        let chat = ChatMessage::from_message(message);
        if message.content.text().len() > BLOCKING_COUNT_THRESHOLD {
            let counter = self.counter.clone();
            return tokio::task::spawn_blocking(move || counter.count_message(&chat))
                .await
                .map_err(|e| Error::internal(e.to_string()));
        }
        Ok(self.counter.count_message(&chat))
    }

    /// Aggressive reclaim when an insert would overflow: sweep warm
    /// segments cold, then optimize down to half the budget.
    fn handle_overflow(&self, entry: &mut SessionEntry) {
        while entry.context.warm_count() > 0 {
            entry.context.move_to_cold(0, Some("[compressed history]".to_string()));
        }
        entry.context.optimize(0.5);
    }

    /// Threshold-triggered compression: score, retain, summarize, swap the
    /// active message set, persist. Serialized per session by the entry
    /// lock the caller already holds.
    async fn compress_entry(
        &self,
        session_id: Uuid,
        guard: &mut SessionEntry,
    ) -> Result<()> {
        info!(
            session_id = %session_id,
            usage_ratio = guard.context.usage_ratio(),
            "triggering compression"
        );

        let (retained, summary) = self.compressor.compress(&guard.session.messages).await;

        if let Some(summary) = &summary {
            guard.session.append_summary(summary);
        }

        guard.session.messages = retained;

        guard.context.clear(true);
        for message in &guard.session.messages {
            if guard.context.contains(message.id) {
                continue;
            }
            let priority = Self::message_priority(message);
            let lock = message.role == Role::System;
            guard.context.add_message(message.clone(), priority, lock);
        }

        if let Some(store) = &self.store {
            store
                .replace_session_messages(
                    session_id,
                    &guard.session.messages,
                    guard.session.summary.as_deref(),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_llm::{MockBehavior, MockProvider};

    fn manager_with(config: MemoryConfig, behavior: MockBehavior) -> MemoryManager {
        let provider = Arc::new(MockProvider::constant(behavior));
        MemoryManager::new(provider, "gpt-4o", None, config).unwrap()
    }

    fn default_manager() -> MemoryManager {
        manager_with(MemoryConfig::default(), MockBehavior::Text("summary".into()))
    }

    #[tokio::test]
    async fn create_session_seeds_locked_system_prompt() {
        let manager = default_manager();
        let session = manager.create_session(Some("be terse")).await.unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::System);
        assert!(session.messages[0].token_count > 0);
    }

    #[tokio::test]
    async fn add_message_assigns_token_count() {
        let manager = default_manager();
        let session = manager.create_session(None).await.unwrap();
        let stored = manager
            .add_message(session.id, Message::user("hello world"))
            .await
            .unwrap();
        assert!(stored.token_count > 0);
    }

    #[tokio::test]
    async fn add_message_to_unknown_session_fails() {
        let manager = default_manager();
        let err = manager
            .add_message(Uuid::new_v4(), Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn render_puts_summary_first() {
        let manager = default_manager();
        let session = manager.create_session(Some("sys")).await.unwrap();
        manager
            .add_message(session.id, Message::user("question"))
            .await
            .unwrap();

        // No summary yet: system prompt renders first.
        let rendered = manager.render_for_llm(session.id).await.unwrap();
        assert_eq!(rendered[0].role, "system");
        assert_eq!(rendered.len(), 2);
    }

    #[tokio::test]
    async fn render_preserves_tool_call_shape() {
        let manager = default_manager();
        let session = manager.create_session(None).await.unwrap();

        let assistant = Message::assistant_with_tools(
            "",
            vec![axon_core::ToolCall::new("call_7", "search", "{}")],
        );
        manager.add_message(session.id, assistant).await.unwrap();
        manager
            .add_message(session.id, Message::tool_result("call_7", "found it"))
            .await
            .unwrap();

        let rendered = manager.render_for_llm(session.id).await.unwrap();
        assert_eq!(rendered[0].tool_calls.as_ref().unwrap()[0].id, "call_7");
        assert_eq!(rendered[1].tool_call_id.as_deref(), Some("call_7"));
    }

    #[tokio::test]
    async fn list_sessions_sorted_and_paged() {
        let manager = default_manager();
        let first = manager.create_session(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        let second = manager.create_session(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        manager
            .add_message(first.id, Message::user("bump"))
            .await
            .unwrap();

        let (infos, total) = manager.list_sessions(1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(infos[0].id, first.id);
        assert_eq!(infos[1].id, second.id);

        let (page2, _) = manager.list_sessions(2, 1).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].id, second.id);
    }

    #[tokio::test]
    async fn delete_session_removes_entry() {
        let manager = default_manager();
        let session = manager.create_session(None).await.unwrap();
        assert!(manager.delete_session(session.id).await.unwrap());
        assert!(manager.get_session(session.id).await.unwrap().is_none());
        assert!(!manager.delete_session(session.id).await.unwrap());
    }

    #[tokio::test]
    async fn compression_triggers_at_threshold() {
        let config = MemoryConfig {
            max_context_tokens: 2_000,
            compression_threshold: 0.5,
            ..Default::default()
        };
        let manager = manager_with(config, MockBehavior::Text("what happened so far".into()));
        let session = manager.create_session(Some("system prompt")).await.unwrap();

        // Push usage past 50% of the available window.
        let filler = "these are some tokens of conversation filler text ".repeat(4);
        for _ in 0..30 {
            manager
                .add_message(session.id, Message::user(filler.clone()))
                .await
                .unwrap();
        }

        let after = manager.get_session(session.id).await.unwrap().unwrap();
        assert!(after.summary.is_some(), "compression should record a summary");
        assert!(
            after.messages.len() < 31,
            "old messages should have been evicted, have {}",
            after.messages.len()
        );
        // System message and the most recent messages survive.
        assert!(after.messages.iter().any(|m| m.role == Role::System));
        let stats = manager.stats(Some(session.id)).await.unwrap();
        assert!(stats["context"]["usage_ratio"].as_f64().unwrap() < 0.5);
    }

    #[tokio::test]
    async fn usage_counters_accumulate() {
        let manager = default_manager();
        let session = manager.create_session(None).await.unwrap();
        let usage = TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 };
        manager.add_usage(session.id, &usage).await.unwrap();
        manager.add_usage(session.id, &usage).await.unwrap();

        let session = manager.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.total_tokens, 30);
        assert_eq!(session.prompt_tokens, 20);
    }
}
