//! AgentLoop - the per-session LLM-call / tool-dispatch cycle
//!
//! Two execution modes over the same state machine: `run` buffers the
//! final response, `run_stream` yields incremental chunks. Each run holds
//! an exclusive claim on its session and a cooperative interrupt signal;
//! a second concurrent run against the same session is rejected.

use crate::interrupt::InterruptRegistry;
use crate::todo::{TodoBroadcast, TodoService};
use axon_core::{
    AgentConfig, ChatResponse, Error, LlmConfig, Message, Result, Session, SessionInfo,
    SessionStatus, StreamChunk, TodoList, TokenUsage, ToolCall,
};
use axon_llm::{ChatMessage, ChatProvider, ChatRequest, StreamDelta, ToolCallAssembler, ToolSpec};
use axon_memory::MemoryManager;
use axon_tools::{ToolExecutor, MANAGE_TODO_LIST};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Instructs the model to keep a plan via manage_todo_list.
const TODO_SYSTEM_PROMPT: &str = "\
You have a tool named manage_todo_list. When a user request needs multiple \
steps to complete (multi-stage analysis, multi-file operations, executing a \
complex plan), you MUST call manage_todo_list to create a task list before \
starting the work.

Rules:
1. Before starting a multi-step task, call manage_todo_list with the complete \
step list (all steps pending, the first one running).
2. After finishing each step, call manage_todo_list again, marking the \
finished step completed and the next one running.
3. Every call must send the COMPLETE list, not an incremental update.
4. At most one step is 'running' at any time.
5. For simple single-step tasks (plain Q&A, translation), do NOT call this tool.";

const INTERRUPTED_MARKER: &str = "[已中断]";

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

fn role_name(role: axon_core::Role) -> &'static str {
    match role {
        axon_core::Role::System => "system",
        axon_core::Role::User => "user",
        axon_core::Role::Assistant => "assistant",
        axon_core::Role::Tool => "tool",
    }
}

/// Releases the session claim and interrupt signal when a run ends.
struct RunGuard {
    claims: Arc<DashMap<Uuid, ()>>,
    interrupts: Arc<InterruptRegistry>,
    session_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.claims.remove(&self.session_id);
        self.interrupts.clear(self.session_id);
    }
}

pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    memory: Arc<MemoryManager>,
    tools: Arc<ToolExecutor>,
    todos: Arc<TodoService>,
    interrupts: Arc<InterruptRegistry>,
    claims: Arc<DashMap<Uuid, ()>>,
    llm_config: LlmConfig,
    agent_config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        memory: Arc<MemoryManager>,
        tools: Arc<ToolExecutor>,
        todos: Arc<TodoService>,
        llm_config: LlmConfig,
        agent_config: AgentConfig,
    ) -> Self {
        info!(model = %llm_config.model, "agent loop initialized");
        Self {
            provider,
            memory,
            tools,
            todos,
            interrupts: Arc::new(InterruptRegistry::new()),
            claims: Arc::new(DashMap::new()),
            llm_config,
            agent_config,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    // -----------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------

    /// Interrupt an active run. Returns false when no run is active.
    pub fn interrupt(&self, session_id: Uuid) -> bool {
        self.interrupts.interrupt(session_id)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.memory.get_session(session_id).await
    }

    pub async fn list_sessions(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<SessionInfo>, usize)> {
        self.memory.list_sessions(page, page_size).await
    }

    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        self.memory.delete_session(session_id).await
    }

    pub async fn get_todo_list(&self, session_id: Uuid) -> Result<Option<TodoList>> {
        self.todos.get_todo_list(session_id).await
    }

    pub async fn stats(&self, session_id: Option<Uuid>) -> Result<serde_json::Value> {
        self.memory.stats(session_id).await
    }

    /// Generate a short title (at most 20 characters after stripping
    /// quotes) from the first messages and persist it on the session.
    pub async fn generate_title(&self, session_id: Uuid) -> Result<String> {
        let session = self
            .memory
            .get_session(session_id)
            .await?
            .ok_or(Error::SessionNotFound(session_id))?;

        if session.messages.is_empty() {
            return Ok("New conversation".to_string());
        }

        let context = session
            .messages
            .iter()
            .take(4)
            .map(|m| {
                let text: String = m.content.text().chars().take(100).collect();
                format!("{}: {}", role_name(m.role), text)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest {
            model: self.llm_config.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You are a title generator. Given a conversation, produce a short \
                     title of at most 20 characters. Output only the title text, with \
                     no quotes, prefixes, or commentary.",
                ),
                ChatMessage::user(format!("Generate a title for this conversation:\n\n{context}")),
            ],
            tools: None,
            max_tokens: Some(50),
            temperature: Some(0.3),
            stream: false,
        };

        let completion = self
            .provider
            .chat(request)
            .await
            .map_err(|e| Error::llm(e.to_string()))?;

        let raw = completion.content.unwrap_or_default();
        let title: String = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
            .trim()
            .chars()
            .take(20)
            .collect();
        let title = if title.is_empty() { "New conversation".to_string() } else { title };

        self.memory.set_title(session_id, &title).await?;
        Ok(title)
    }

    // -----------------------------------------------------------------
    // Buffered mode
    // -----------------------------------------------------------------

    /// Run to completion and return the final response.
    pub async fn run(
        &self,
        message: &str,
        session_id: Option<Uuid>,
        tools: Option<Vec<ToolSpec>>,
    ) -> Result<ChatResponse> {
        if message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }

        let session = self.ensure_session(session_id).await?;
        let _guard = self.claim(session.id)?;
        let interrupt_flag = self.interrupts.register(session.id);

        self.memory.set_status(session.id, SessionStatus::Processing).await?;
        self.memory.add_message(session.id, Message::user(message)).await?;

        let tool_specs = tools.unwrap_or_else(|| self.tools.registry().to_specs());
        let mut usage = TokenUsage::default();
        let mut last_assistant: Option<Message> = None;
        let mut iterations: u32 = 0;

        while iterations < self.agent_config.max_iterations {
            if interrupt_flag.load(Ordering::SeqCst) {
                break;
            }

            let completion = match self.chat_once(session.id, &tool_specs).await {
                Ok(completion) => completion,
                Err(err) => {
                    let _ = self.memory.set_status(session.id, SessionStatus::Failed).await;
                    let _ = self.memory.add_usage(session.id, &usage).await;
                    return Err(err);
                }
            };
            usage.add(&completion.usage);

            let assistant = Message::assistant_with_tools(
                completion.content.clone().unwrap_or_default(),
                completion.tool_calls.clone(),
            );
            self.memory.add_message(session.id, assistant.clone()).await?;
            last_assistant = Some(assistant);

            if completion.tool_calls.is_empty() {
                break;
            }

            self.dispatch_tool_calls(session.id, &completion.tool_calls, None)
                .await?;

            iterations += 1;
            self.memory.set_iteration(session.id, iterations).await?;
        }

        self.memory.add_usage(session.id, &usage).await?;

        if interrupt_flag.load(Ordering::SeqCst) {
            let assistant = match last_assistant {
                Some(assistant) => assistant,
                None => {
                    let fabricated = Message::assistant(INTERRUPTED_MARKER);
                    self.memory.add_message(session.id, fabricated.clone()).await?;
                    fabricated
                }
            };
            self.memory.set_status(session.id, SessionStatus::Interrupted).await?;
            return Ok(ChatResponse {
                session_id: session.id,
                message: assistant,
                status: SessionStatus::Interrupted,
                usage,
            });
        }

        let assistant = last_assistant
            .ok_or_else(|| Error::internal("LLM did not return any response"))?;

        if assistant.has_tool_calls() {
            self.memory.set_status(session.id, SessionStatus::Failed).await?;
            return Err(Error::MaxIterations(self.agent_config.max_iterations));
        }

        self.memory.set_status(session.id, SessionStatus::Completed).await?;
        Ok(ChatResponse {
            session_id: session.id,
            message: assistant,
            status: SessionStatus::Completed,
            usage,
        })
    }

    // -----------------------------------------------------------------
    // Streamed mode
    // -----------------------------------------------------------------

    /// Run with incremental output. The stream begins with exactly one
    /// `session` chunk and ends with exactly one `done` or `error` chunk.
    pub fn run_stream(
        self: &Arc<Self>,
        message: String,
        session_id: Option<Uuid>,
        tools: Option<Vec<ToolSpec>>,
    ) -> ChunkStream {
        let agent = self.clone();

        Box::pin(async_stream::stream! {
            if message.trim().is_empty() {
                yield StreamChunk::error(
                    session_id.unwrap_or_else(Uuid::nil),
                    Error::EmptyMessage.to_string(),
                );
                return;
            }

            let session = match agent.ensure_session(session_id).await {
                Ok(session) => session,
                Err(err) => {
                    yield StreamChunk::error(session_id.unwrap_or_else(Uuid::nil), err.to_string());
                    return;
                }
            };

            let _guard = match agent.claim(session.id) {
                Ok(guard) => guard,
                Err(err) => {
                    yield StreamChunk::error(session.id, err.to_string());
                    return;
                }
            };
            let interrupt_flag = agent.interrupts.register(session.id);

            // Session id first, always.
            yield StreamChunk::session(session.id);

            let _ = agent.memory.set_status(session.id, SessionStatus::Processing).await;
            if let Err(err) = agent.memory.add_message(session.id, Message::user(&*message)).await {
                yield StreamChunk::error(session.id, err.to_string());
                return;
            }

            let tool_specs = tools.unwrap_or_else(|| agent.tools.registry().to_specs());
            let mut usage = TokenUsage::default();
            let mut iterations: u32 = 0;
            let mut pending_tool_calls = false;
            let mut interrupted = false;
            let mut failure: Option<String> = None;

            'outer: while iterations < agent.agent_config.max_iterations {
                if interrupt_flag.load(Ordering::SeqCst) {
                    interrupted = true;
                    break;
                }

                let messages = match agent.memory.render_for_llm(session.id).await {
                    Ok(messages) => messages,
                    Err(err) => { failure = Some(err.to_string()); break; }
                };

                let request = ChatRequest {
                    model: agent.llm_config.model.clone(),
                    messages,
                    tools: (!tool_specs.is_empty()).then(|| tool_specs.clone()),
                    max_tokens: Some(agent.llm_config.max_tokens),
                    temperature: Some(agent.llm_config.temperature),
                    stream: true,
                };

                let mut stream = match agent.provider.chat_stream(request).await {
                    Ok(stream) => stream,
                    Err(err) => { failure = Some(err.to_string()); break; }
                };

                let mut content = String::new();
                let mut assembler = ToolCallAssembler::new();

                while let Some(delta) = stream.next().await {
                    // Poll the interrupt between deltas; dropping the
                    // stream below closes the provider connection.
                    if interrupt_flag.load(Ordering::SeqCst) {
                        interrupted = true;
                        break;
                    }

                    match delta {
                        Ok(StreamDelta::Reasoning(thinking)) => {
                            yield StreamChunk::thinking(session.id, thinking);
                        }
                        Ok(StreamDelta::Content(delta)) => {
                            content.push_str(&delta);
                            yield StreamChunk::content(session.id, delta);
                        }
                        Ok(StreamDelta::ToolCall { index, id, name, arguments }) => {
                            assembler.apply(index, id, name, &arguments);
                        }
                        Ok(StreamDelta::Usage(u)) => usage.add(&u),
                        Ok(StreamDelta::Done { .. }) => {}
                        Err(err) => {
                            failure = Some(err.to_string());
                            break 'outer;
                        }
                    }
                }
                drop(stream);

                if interrupted {
                    // Persist the partial assistant message verbatim.
                    let partial = Message::assistant(content.clone());
                    if let Err(err) = agent.memory.add_message(session.id, partial).await {
                        failure = Some(err.to_string());
                    }
                    break;
                }

                let tool_calls = match assembler.finish() {
                    Ok(tool_calls) => tool_calls,
                    Err(err) => { failure = Some(err.to_string()); break; }
                };

                let assistant = Message::assistant_with_tools(content, tool_calls.clone());
                if let Err(err) = agent.memory.add_message(session.id, assistant).await {
                    failure = Some(err.to_string());
                    break;
                }

                if tool_calls.is_empty() {
                    pending_tool_calls = false;
                    break;
                }
                pending_tool_calls = true;

                // Todo snapshots buffer through the broadcast callback and
                // flush before the next LLM call starts.
                let buffered: Arc<std::sync::Mutex<Vec<StreamChunk>>> = Arc::default();
                let sink = buffered.clone();
                let broadcast: TodoBroadcast = Arc::new(move |chunk| {
                    if let Ok(mut buffer) = sink.lock() {
                        buffer.push(chunk);
                    }
                });

                if let Err(err) = agent
                    .dispatch_tool_calls(session.id, &tool_calls, Some(&broadcast))
                    .await
                {
                    failure = Some(err.to_string());
                    break;
                }

                let chunks: Vec<StreamChunk> = match buffered.lock() {
                    Ok(mut buffer) => buffer.drain(..).collect(),
                    Err(_) => Vec::new(),
                };
                for chunk in chunks {
                    yield chunk;
                }

                iterations += 1;
                let _ = agent.memory.set_iteration(session.id, iterations).await;
            }

            let _ = agent.memory.add_usage(session.id, &usage).await;

            if let Some(message) = failure {
                let _ = agent.memory.set_status(session.id, SessionStatus::Failed).await;
                yield StreamChunk::error(session.id, message);
            } else if interrupted {
                let _ = agent.memory.set_status(session.id, SessionStatus::Interrupted).await;
                yield StreamChunk::done_interrupted(session.id);
            } else if pending_tool_calls {
                let _ = agent.memory.set_status(session.id, SessionStatus::Failed).await;
                yield StreamChunk::error(
                    session.id,
                    Error::MaxIterations(agent.agent_config.max_iterations).to_string(),
                );
            } else {
                let _ = agent.memory.set_status(session.id, SessionStatus::Completed).await;
                yield StreamChunk::done(session.id);
            }
        })
    }

    // -----------------------------------------------------------------
    // Shared internals
    // -----------------------------------------------------------------

    /// Load or create the session, making sure the todo instructions are
    /// present exactly once.
    async fn ensure_session(&self, session_id: Option<Uuid>) -> Result<Session> {
        match session_id {
            None => self.memory.create_session(Some(TODO_SYSTEM_PROMPT)).await,
            Some(id) => {
                let session = self
                    .memory
                    .get_session(id)
                    .await?
                    .ok_or(Error::SessionNotFound(id))?;

                let has_todo_prompt = session.messages.iter().any(|m| {
                    m.role == axon_core::Role::System
                        && m.content.text().contains(MANAGE_TODO_LIST)
                });
                if !has_todo_prompt {
                    self.memory
                        .add_message(id, Message::system(TODO_SYSTEM_PROMPT))
                        .await?;
                }
                Ok(session)
            }
        }
    }

    /// Take the exclusive per-session run claim, or reject.
    fn claim(&self, session_id: Uuid) -> Result<RunGuard> {
        match self.claims.entry(session_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::SessionBusy(session_id)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(RunGuard {
                    claims: self.claims.clone(),
                    interrupts: self.interrupts.clone(),
                    session_id,
                })
            }
        }
    }

    async fn chat_once(
        &self,
        session_id: Uuid,
        tool_specs: &[ToolSpec],
    ) -> Result<axon_llm::ChatCompletion> {
        let messages = self.memory.render_for_llm(session_id).await?;
        let request = ChatRequest {
            model: self.llm_config.model.clone(),
            messages,
            tools: (!tool_specs.is_empty()).then(|| tool_specs.to_vec()),
            max_tokens: Some(self.llm_config.max_tokens),
            temperature: Some(self.llm_config.temperature),
            stream: false,
        };

        self.provider
            .chat(request)
            .await
            .map_err(|e| Error::llm(e.to_string()))
    }

    /// Partition tool calls into todo-list calls (handled in declared
    /// order through the todo service) and regular calls (bounded-parallel
    /// through the executor), then append one tool message per call id.
    async fn dispatch_tool_calls(
        &self,
        session_id: Uuid,
        tool_calls: &[ToolCall],
        broadcast: Option<&TodoBroadcast>,
    ) -> Result<()> {
        let (todo_calls, regular_calls): (Vec<&ToolCall>, Vec<&ToolCall>) = tool_calls
            .iter()
            .partition(|tc| tc.function.name == MANAGE_TODO_LIST);

        for tc in todo_calls {
            let reply = self
                .todos
                .handle_tool_call(session_id, &tc.function.arguments, broadcast)
                .await;
            self.memory
                .add_message(session_id, Message::tool_result(tc.id.clone(), reply))
                .await?;
        }

        if !regular_calls.is_empty() {
            let owned: Vec<ToolCall> = regular_calls.into_iter().cloned().collect();
            let results = self.tools.execute(&owned, Some(session_id)).await;
            for result in results {
                debug!(
                    tool = %result.name,
                    success = result.success,
                    "tool execution finished"
                );
                self.memory
                    .add_message(
                        session_id,
                        Message::tool_result(result.tool_call_id.clone(), result.content_for_llm()),
                    )
                    .await?;
            }
        }

        Ok(())
    }
}
