//! Tests for axon-tools: registry, discovery, and the bounded executor

use axon_core::{Error, Result, ToolCall, ToolsConfig};
use axon_tools::{discover_tools, PluginRegistry, Tool, ToolExecutor, ToolRegistry};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the input back"
    }
    async fn execute(&self, args: Value) -> Result<String> {
        Ok(args.get("text").and_then(Value::as_str).unwrap_or("").to_string())
    }
}

struct FailingTool;

#[async_trait::async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    async fn execute(&self, _args: Value) -> Result<String> {
        Err(Error::tool("failing", "deliberate failure"))
    }
}

/// Sleeps, and records how many executions run concurrently.
struct SlowTool {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Sleeps for a while"
    }
    async fn execute(&self, _args: Value) -> Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok("done".to_string())
    }
}

fn call(id: &str, name: &str, args: &str) -> ToolCall {
    ToolCall::new(id, name, args)
}

fn executor_with(tools: Vec<Arc<dyn Tool>>, max_parallel: usize, timeout: Duration) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    ToolExecutor::new(Arc::new(registry), max_parallel, timeout)
}

// ===========================================================================
// Registry + discovery
// ===========================================================================

#[test]
fn registry_drops_duplicate_names() {
    let mut registry = ToolRegistry::new();
    assert!(registry.register(Arc::new(EchoTool)));
    assert!(!registry.register(Arc::new(EchoTool)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn discovery_assembles_builtins() {
    let registry =
        discover_tools(&ToolsConfig::default(), None, &PluginRegistry::new()).unwrap();
    let names = registry.names();
    for expected in ["calculator", "get_datetime", "search", "manage_todo_list"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    // No sandbox handle, no python tool.
    assert!(!names.contains(&"python_executor"));
}

#[test]
fn discovery_includes_plugin_group() {
    let mut plugins = PluginRegistry::new();
    plugins.register(
        "axon.tools",
        "test-provider",
        Arc::new(|| Ok(vec![Arc::new(EchoTool) as Arc<dyn Tool>])),
    );

    let registry = discover_tools(&ToolsConfig::default(), None, &plugins).unwrap();
    assert!(registry.names().contains(&"echo"));
}

#[test]
fn discovery_failure_is_nonfatal_unless_fail_fast() {
    let mut plugins = PluginRegistry::new();
    plugins.register(
        "axon.tools",
        "broken-provider",
        Arc::new(|| Err(Error::internal("provider exploded"))),
    );

    let lenient = discover_tools(&ToolsConfig::default(), None, &plugins).unwrap();
    assert!(lenient.names().contains(&"calculator"));

    let strict = ToolsConfig { discovery_fail_fast: true, ..Default::default() };
    assert!(discover_tools(&strict, None, &plugins).is_err());
}

#[test]
fn specs_carry_function_shape() {
    let registry =
        discover_tools(&ToolsConfig::default(), None, &PluginRegistry::new()).unwrap();
    let specs = registry.to_specs();
    let calc = specs
        .iter()
        .find(|s| s.function.name == "calculator")
        .unwrap();
    assert_eq!(calc.spec_type, "function");
    assert_eq!(calc.function.parameters["required"][0], "expression");
}

// ===========================================================================
// Executor
// ===========================================================================

#[tokio::test]
async fn results_preserve_input_order_and_length() {
    let executor = executor_with(
        vec![Arc::new(EchoTool), Arc::new(FailingTool)],
        5,
        Duration::from_secs(5),
    );

    let calls = vec![
        call("c1", "echo", r#"{"text":"one"}"#),
        call("c2", "failing", "{}"),
        call("c3", "echo", r#"{"text":"three"}"#),
    ];
    let results = executor.execute(&calls, None).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].tool_call_id, "c1");
    assert_eq!(results[0].content, "one");
    assert!(results[0].success);

    assert_eq!(results[1].tool_call_id, "c2");
    assert!(!results[1].success);
    assert!(results[1].content_for_llm().contains("deliberate failure"));

    // A failed sibling never cancels the rest.
    assert!(results[2].success);
    assert_eq!(results[2].content, "three");
}

#[tokio::test]
async fn malformed_arguments_are_materialized() {
    let executor = executor_with(vec![Arc::new(EchoTool)], 5, Duration::from_secs(5));
    let results = executor
        .execute(&[call("c1", "echo", "this is not json")], None)
        .await;
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_deref(), Some("Invalid JSON arguments"));
}

#[tokio::test]
async fn unknown_tool_is_materialized() {
    let executor = executor_with(vec![Arc::new(EchoTool)], 5, Duration::from_secs(5));
    let results = executor.execute(&[call("c1", "nope", "{}")], None).await;
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_deref(), Some("Tool 'nope' not found"));
}

#[tokio::test]
async fn timeouts_are_materialized() {
    let executor = executor_with(
        vec![Arc::new(SlowTool {
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_secs(10),
        })],
        5,
        Duration::from_millis(50),
    );
    let results = executor.execute(&[call("c1", "slow", "{}")], None).await;
    assert!(!results[0].success);
    assert!(results[0].error.as_ref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn parallelism_is_bounded() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor = executor_with(
        vec![Arc::new(SlowTool {
            active: active.clone(),
            peak: peak.clone(),
            delay: Duration::from_millis(30),
        })],
        2,
        Duration::from_secs(5),
    );

    let calls: Vec<ToolCall> = (0..8)
        .map(|i| call(&format!("c{i}"), "slow", "{}"))
        .collect();
    let results = executor.execute(&calls, None).await;

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.success));
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "peak concurrency {} exceeded the bound",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn history_is_recorded_per_session() {
    let executor = executor_with(vec![Arc::new(EchoTool)], 5, Duration::from_secs(5));
    let session_id = uuid::Uuid::new_v4();

    executor
        .execute(&[call("c1", "echo", r#"{"text":"hi"}"#)], Some(session_id))
        .await;
    executor
        .execute(&[call("c2", "echo", r#"{"text":"again"}"#)], Some(session_id))
        .await;

    let history = executor.history(session_id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].tool_call_id, "c2");

    executor.clear_history(Some(session_id));
    assert!(executor.history(session_id).is_empty());
}

#[tokio::test]
async fn empty_arguments_parse_as_empty_object() {
    let executor = executor_with(vec![Arc::new(EchoTool)], 5, Duration::from_secs(5));
    let results = executor.execute(&[call("c1", "echo", "")], None).await;
    assert!(results[0].success);
    assert_eq!(results[0].content, "");
}
