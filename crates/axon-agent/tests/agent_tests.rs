//! End-to-end tests for the agent loop: buffered and streamed runs,
//! tool dispatch, todo flow, interruption, and iteration bounds.

use axon_agent::{AgentLoop, TodoService};
use axon_core::{
    AgentConfig, ChunkType, Error, LlmConfig, MemoryConfig, Role, SessionStatus, TodoItemStatus,
    ToolsConfig,
};
use axon_llm::{ChatProvider, MockBehavior, MockProvider};
use axon_memory::MemoryManager;
use axon_store::MemoryTodoStore;
use axon_tools::{discover_tools, PluginRegistry, ToolExecutor};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn agent_with(provider: MockProvider, agent_config: AgentConfig) -> Arc<AgentLoop> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let provider = Arc::new(provider);
    let memory = Arc::new(
        MemoryManager::new(
            provider.clone() as Arc<dyn ChatProvider>,
            "gpt-4o",
            None,
            MemoryConfig::default(),
        )
        .unwrap(),
    );
    let registry = discover_tools(&ToolsConfig::default(), None, &PluginRegistry::new()).unwrap();
    let tools = Arc::new(ToolExecutor::new(
        Arc::new(registry),
        agent_config.max_parallel_tools,
        Duration::from_secs(agent_config.tool_timeout_secs),
    ));
    let todos = Arc::new(TodoService::new(Arc::new(MemoryTodoStore::new())));

    Arc::new(AgentLoop::new(
        provider,
        memory,
        tools,
        todos,
        LlmConfig::default(),
        agent_config,
    ))
}

fn agent(provider: MockProvider) -> Arc<AgentLoop> {
    agent_with(provider, AgentConfig::default())
}

// ===========================================================================
// Scenario: plain QA, buffered
// ===========================================================================

#[tokio::test]
async fn plain_qa_buffered() {
    let agent = agent(MockProvider::constant(MockBehavior::Text("4".into())));

    let response = agent.run("What is 2+2?", None, None).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);
    assert_eq!(response.message.content.text(), "4");
    assert!(response.usage.total_tokens > 0);

    let session = agent.get_session(response.session_id).await.unwrap().unwrap();
    // Seeded system prompt + user + assistant.
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[0].role, Role::System);
    assert_eq!(session.messages[1].role, Role::User);
    assert_eq!(session.messages[2].role, Role::Assistant);
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let agent = agent(MockProvider::constant(MockBehavior::Text("x".into())));
    assert!(matches!(
        agent.run("   ", None, None).await.unwrap_err(),
        Error::EmptyMessage
    ));
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let agent = agent(MockProvider::constant(MockBehavior::Text("x".into())));
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        agent.run("hi", Some(missing), None).await.unwrap_err(),
        Error::SessionNotFound(id) if id == missing
    ));
}

// ===========================================================================
// Scenario: single tool call
// ===========================================================================

#[tokio::test]
async fn single_tool_call_round_trip() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::tool_call("get_datetime", json!({"timezone": "Asia/Tokyo"})),
        MockBehavior::Text("The current time in Tokyo is shown above.".into()),
    ]));

    let response = agent.run("Time in Tokyo?", None, None).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);

    let session = agent.get_session(response.session_id).await.unwrap().unwrap();
    // system, user, assistant(tool_calls), tool, assistant(final)
    assert_eq!(session.messages.len(), 5);

    let with_calls = &session.messages[2];
    assert_eq!(with_calls.role, Role::Assistant);
    let call_ids: Vec<&str> = with_calls
        .tool_calls
        .as_ref()
        .unwrap()
        .iter()
        .map(|tc| tc.id.as_str())
        .collect();

    let tool_msg = &session.messages[3];
    assert_eq!(tool_msg.role, Role::Tool);
    assert!(call_ids.contains(&tool_msg.tool_call_id.as_deref().unwrap()));
    // The real datetime tool actually ran.
    let tool_output = tool_msg.content.text();
    assert!(tool_output.contains("JST") || tool_output.contains("+09"), "got {tool_output}");

    assert_eq!(session.messages[4].role, Role::Assistant);
    assert!(!session.messages[4].has_tool_calls());
}

#[tokio::test]
async fn tool_results_match_call_ids_for_parallel_batch() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::ToolCalls {
            text: None,
            calls: vec![
                ("calculator".into(), json!({"expression": "2+3"})),
                ("search".into(), json!({"query": "rust"})),
            ],
        },
        MockBehavior::Text("done".into()),
    ]));

    let response = agent.run("compute and search", None, None).await.unwrap();
    let session = agent.get_session(response.session_id).await.unwrap().unwrap();

    let assistant = session
        .messages
        .iter()
        .find(|m| m.has_tool_calls())
        .expect("assistant with tool calls");
    let mut expected: Vec<String> = assistant
        .tool_calls
        .as_ref()
        .unwrap()
        .iter()
        .map(|tc| tc.id.clone())
        .collect();

    let mut actual: Vec<String> = session
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();

    expected.sort();
    actual.sort();
    assert_eq!(actual, expected, "tool messages must be a permutation of call ids");
}

#[tokio::test]
async fn malformed_tool_arguments_do_not_stop_the_loop() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::MalformedToolCall {
            name: "calculator".into(),
            raw_arguments: "{not valid json".into(),
        },
        MockBehavior::Text("recovered".into()),
    ]));

    let response = agent.run("try this", None, None).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);
    assert_eq!(response.message.content.text(), "recovered");

    let session = agent.get_session(response.session_id).await.unwrap().unwrap();
    let tool_msg = session
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result message");
    assert!(tool_msg.content.text().contains("Invalid JSON arguments"));
}

// ===========================================================================
// Iteration bound
// ===========================================================================

#[tokio::test]
async fn max_iterations_bounds_llm_calls() {
    let config = AgentConfig { max_iterations: 3, ..Default::default() };
    let provider = MockProvider::constant(MockBehavior::tool_call(
        "calculator",
        json!({"expression": "1+1"}),
    ));
    let agent = agent_with(provider, config);

    let err = agent.run("loop forever", None, None).await.unwrap_err();
    assert!(matches!(err, Error::MaxIterations(3)));
}

// ===========================================================================
// Streamed mode
// ===========================================================================

#[tokio::test]
async fn stream_emits_session_first_and_done_last() {
    let agent = agent(MockProvider::constant(MockBehavior::ThinkingThenText {
        thinking: "let me think".into(),
        text: "here is the answer".into(),
    }));

    let chunks: Vec<_> = agent
        .run_stream("hello".into(), None, None)
        .collect::<Vec<_>>()
        .await;

    assert_eq!(chunks[0].chunk_type, ChunkType::Session);
    assert_eq!(
        chunks.iter().filter(|c| c.chunk_type == ChunkType::Session).count(),
        1
    );
    assert_eq!(chunks.last().unwrap().chunk_type, ChunkType::Done);
    assert_eq!(
        chunks
            .iter()
            .filter(|c| matches!(c.chunk_type, ChunkType::Done | ChunkType::Error))
            .count(),
        1
    );

    let thinking: String = chunks
        .iter()
        .filter_map(|c| c.thinking.clone())
        .collect();
    assert_eq!(thinking, "let me think");

    let content: String = chunks
        .iter()
        .filter(|c| c.chunk_type == ChunkType::Content)
        .map(|c| c.delta.clone())
        .collect();
    assert_eq!(content, "here is the answer");
}

#[tokio::test]
async fn todo_flow_streamed_with_monotonic_revisions() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::ToolCalls {
            text: Some("Planning the analysis".into()),
            calls: vec![(
                "manage_todo_list".into(),
                json!({
                    "title": "数据分析",
                    "items": [
                        {"label": "收集数据", "status": "pending"},
                        {"label": "清洗数据", "status": "pending"},
                        {"label": "建模评估", "status": "pending"},
                    ]
                }),
            )],
        },
        MockBehavior::ToolCalls {
            text: None,
            calls: vec![(
                "manage_todo_list".into(),
                json!({
                    "title": "数据分析",
                    "items": [
                        {"label": "收集数据", "status": "completed"},
                        {"label": "清洗数据", "status": "running"},
                        {"label": "建模评估", "status": "pending"},
                    ]
                }),
            )],
        },
        MockBehavior::Text("分析完成".into()),
    ]));

    let chunks: Vec<_> = agent
        .run_stream("分析这个数据集，分三步".into(), None, None)
        .collect::<Vec<_>>()
        .await;

    assert_eq!(chunks[0].chunk_type, ChunkType::Session);
    let session_id = chunks[0].session_id;

    let todo_chunks: Vec<_> = chunks
        .iter()
        .filter(|c| c.chunk_type == ChunkType::TodoList)
        .collect();
    assert_eq!(todo_chunks.len(), 2);

    let first = todo_chunks[0].todo_list.as_ref().unwrap();
    assert_eq!(first.revision, 1);
    // Service forces the first item to running.
    assert_eq!(first.items[0].status, TodoItemStatus::Running);
    assert_eq!(first.running_count(), 1);

    let second = todo_chunks[1].todo_list.as_ref().unwrap();
    assert_eq!(second.revision, 2);
    assert_eq!(second.items[0].status, TodoItemStatus::Completed);
    assert_eq!(second.items[1].status, TodoItemStatus::Running);

    assert_eq!(chunks.last().unwrap().chunk_type, ChunkType::Done);

    // The snapshot is also readable after the run.
    let snapshot = agent.get_todo_list(session_id).await.unwrap().unwrap();
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.title, "数据分析");
}

#[tokio::test]
async fn interrupt_mid_stream_persists_partial_and_signals() {
    let provider = MockProvider::constant(MockBehavior::Text(
        "alpha beta gamma delta epsilon zeta eta theta".into(),
    ))
    .with_delta_delay(Duration::from_millis(20));
    let agent = agent(provider);

    let mut stream = agent.run_stream("tell me everything".into(), None, None);

    let session_chunk = stream.next().await.unwrap();
    assert_eq!(session_chunk.chunk_type, ChunkType::Session);
    let session_id = session_chunk.session_id;

    // Let the first content delta through, then interrupt.
    let first_content = stream.next().await.unwrap();
    assert_eq!(first_content.chunk_type, ChunkType::Content);
    assert!(agent.interrupt(session_id), "active run should accept interrupt");

    let rest: Vec<_> = stream.collect::<Vec<_>>().await;
    let last = rest.last().unwrap();
    assert_eq!(last.chunk_type, ChunkType::Done);
    assert_eq!(last.delta, "[已中断]");

    let session = agent.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Interrupted);

    // The partial assistant message was persisted verbatim: exactly the
    // content that was streamed out before the interrupt.
    let streamed: String = std::iter::once(&first_content)
        .chain(rest.iter())
        .filter(|c| c.chunk_type == ChunkType::Content)
        .map(|c| c.delta.clone())
        .collect();
    let assistant = session
        .messages
        .iter()
        .rfind(|m| m.role == Role::Assistant)
        .expect("partial assistant message");
    assert_eq!(assistant.content.text(), streamed);
    assert!(assistant.content.text().len() < "alpha beta gamma delta epsilon zeta eta theta".len());
}

#[tokio::test]
async fn interrupt_without_active_run_is_false() {
    let agent = agent(MockProvider::constant(MockBehavior::Text("x".into())));
    assert!(!agent.interrupt(uuid::Uuid::new_v4()));

    // After a completed run the signal is cleared again.
    let response = agent.run("hi", None, None).await.unwrap();
    assert!(!agent.interrupt(response.session_id));
}

#[tokio::test]
async fn concurrent_run_on_same_session_is_rejected() {
    let provider = MockProvider::constant(MockBehavior::Text(
        "a response long enough to stream slowly".into(),
    ))
    .with_delta_delay(Duration::from_millis(30));
    let agent = agent(provider);

    let mut stream = agent.run_stream("first".into(), None, None);
    let session_chunk = stream.next().await.unwrap();
    let session_id = session_chunk.session_id;

    // Claim is held while the stream is alive.
    let err = agent.run("second", Some(session_id), None).await.unwrap_err();
    assert!(matches!(err, Error::SessionBusy(id) if id == session_id));

    // Drain; afterwards the session accepts runs again.
    let _: Vec<_> = stream.collect::<Vec<_>>().await;
    let response = agent.run("second again", Some(session_id), None).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);
}

#[tokio::test]
async fn stream_llm_error_emits_single_error_chunk() {
    let agent = agent(MockProvider::constant(MockBehavior::Error("provider down".into())));

    let chunks: Vec<_> = agent
        .run_stream("hello".into(), None, None)
        .collect::<Vec<_>>()
        .await;

    assert_eq!(chunks[0].chunk_type, ChunkType::Session);
    let last = chunks.last().unwrap();
    assert_eq!(last.chunk_type, ChunkType::Error);
    assert!(last.delta.contains("provider down"));
    assert_eq!(
        chunks
            .iter()
            .filter(|c| matches!(c.chunk_type, ChunkType::Done | ChunkType::Error))
            .count(),
        1
    );
}

// ===========================================================================
// Title generation
// ===========================================================================

#[tokio::test]
async fn generate_title_strips_quotes_and_caps_length() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::Text("sure, here you go".into()),
        MockBehavior::Text("\"A very long generated conversation title indeed\"".into()),
    ]));

    let response = agent.run("hello there", None, None).await.unwrap();
    let title = agent.generate_title(response.session_id).await.unwrap();

    assert!(!title.starts_with('"'));
    assert!(title.chars().count() <= 20);

    let session = agent.get_session(response.session_id).await.unwrap().unwrap();
    assert_eq!(session.title.as_deref(), Some(title.as_str()));
}

// ===========================================================================
// Session management passthroughs
// ===========================================================================

#[tokio::test]
async fn sessions_list_and_delete() {
    let agent = agent(MockProvider::constant(MockBehavior::Text("ok".into())));

    let a = agent.run("first session", None, None).await.unwrap();
    let b = agent.run("second session", None, None).await.unwrap();

    let (infos, total) = agent.list_sessions(1, 10).await.unwrap();
    assert_eq!(total, 2);
    // Most recently updated first.
    assert_eq!(infos[0].id, b.session_id);

    assert!(agent.delete_session(a.session_id).await.unwrap());
    let (_, total) = agent.list_sessions(1, 10).await.unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn continuing_a_session_keeps_history() {
    let agent = agent(MockProvider::sequence(vec![
        MockBehavior::Text("first answer".into()),
        MockBehavior::Text("second answer".into()),
    ]));

    let first = agent.run("question one", None, None).await.unwrap();
    let second = agent
        .run("question two", Some(first.session_id), None)
        .await
        .unwrap();
    assert_eq!(first.session_id, second.session_id);

    let session = agent.get_session(first.session_id).await.unwrap().unwrap();
    // system + (user, assistant) * 2
    assert_eq!(session.messages.len(), 5);
}
