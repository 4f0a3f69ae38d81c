//! Dispatcher: queue → pipeline → buffered run

use axon_agent::{AgentLoop, Dispatcher, PriorityMessageQueue, TodoService};
use axon_core::{AgentConfig, LlmConfig, MemoryConfig, SessionStatus, ToolsConfig};
use axon_llm::{ChatProvider, MockBehavior, MockProvider};
use axon_memory::MemoryManager;
use axon_store::MemoryTodoStore;
use axon_tools::{discover_tools, PluginRegistry, ToolExecutor};
use std::sync::Arc;
use std::time::Duration;

fn make_agent() -> Arc<AgentLoop> {
    let provider = Arc::new(MockProvider::constant(MockBehavior::Text("queued answer".into())));
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
    let tools = Arc::new(ToolExecutor::new(Arc::new(registry), 5, Duration::from_secs(30)));
    let todos = Arc::new(TodoService::new(Arc::new(MemoryTodoStore::new())));
    Arc::new(AgentLoop::new(
        provider,
        memory,
        tools,
        todos,
        LlmConfig::default(),
        AgentConfig::default(),
    ))
}

#[tokio::test]
async fn queued_request_is_processed_to_completion() {
    let agent = make_agent();
    let queue = Arc::new(PriorityMessageQueue::in_memory(100));
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), agent.clone()));
    let worker = dispatcher.spawn();

    dispatcher.submit("hello through the queue", None, 5).await.unwrap();

    // Wait for the worker to drain and process the request.
    let mut session = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (infos, total) = agent.list_sessions(1, 10).await.unwrap();
        if total == 1 && infos[0].status == SessionStatus::Completed {
            session = Some(infos[0].clone());
            break;
        }
    }
    let session = session.expect("queued request should complete");
    assert_eq!(session.message_count, 3); // system + user + assistant

    dispatcher.shutdown();
    let _ = worker.await;
}

#[tokio::test]
async fn empty_submission_is_rejected_before_enqueue() {
    let agent = make_agent();
    let queue = Arc::new(PriorityMessageQueue::in_memory(100));
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), agent));

    assert!(dispatcher.submit("   ", None, 5).await.is_err());
    assert_eq!(queue.len().await, 0);
}
