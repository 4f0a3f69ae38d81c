//! Bounded-parallel tool dispatch
//!
//! Executes a batch of model-produced tool calls with a concurrency cap
//! and a per-call timeout. Results come back in input order and failures
//! are always materialized; one bad call never cancels its siblings.

use crate::registry::ToolRegistry;
use axon_core::ToolCall;
use axon_llm::parse_lenient_json;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// Per-session execution history cap (in-memory only).
const HISTORY_LIMIT: usize = 100;

/// Outcome of one tool call.
#[derive(Clone, Debug)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    pub execution_time: f64,
}

impl ToolExecution {
    fn failure(tool_call_id: &str, name: &str, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            name: name.to_string(),
            success: false,
            content: String::new(),
            error: Some(error.into()),
            execution_time: 0.0,
        }
    }

    /// The string fed back to the model as the tool message body.
    pub fn content_for_llm(&self) -> String {
        if self.success {
            self.content.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_parallel: usize,
    default_timeout: Duration,
    history: DashMap<Uuid, Vec<ToolExecution>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_parallel: usize, default_timeout: Duration) -> Self {
        Self {
            registry,
            max_parallel: max_parallel.max(1),
            default_timeout,
            history: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch. The output has the same length and order as the
    /// input; at most `max_parallel` calls are in flight at any instant.
    pub async fn execute(
        &self,
        tool_calls: &[ToolCall],
        session_id: Option<Uuid>,
    ) -> Vec<ToolExecution> {
        if tool_calls.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let tasks = tool_calls.iter().map(|tc| {
            let semaphore = semaphore.clone();
            async move {
                // A closed-semaphore error cannot happen here; fall through
                // to unbounded execution rather than dropping the call.
                let _permit = semaphore.acquire().await;
                self.execute_single(tc).await
            }
        });

        let results = futures::future::join_all(tasks).await;

        if let Some(session_id) = session_id {
            let mut entry = self.history.entry(session_id).or_default();
            entry.extend(results.iter().cloned());
            let overflow = entry.len().saturating_sub(HISTORY_LIMIT);
            if overflow > 0 {
                entry.drain(..overflow);
            }
        }

        results
    }

    async fn execute_single(&self, tool_call: &ToolCall) -> ToolExecution {
        let id = &tool_call.id;
        let name = &tool_call.function.name;

        let args = match parse_lenient_json(&tool_call.function.arguments) {
            Ok(args) => args,
            Err(_) => return ToolExecution::failure(id, name, "Invalid JSON arguments"),
        };

        let Some(tool) = self.registry.get(name) else {
            return ToolExecution::failure(id, name, format!("Tool '{name}' not found"));
        };

        debug!(tool = %name, tool_call_id = %id, "executing tool");
        let started = Instant::now();

        match tokio::time::timeout(self.default_timeout, tool.execute(args)).await {
            Ok(Ok(content)) => ToolExecution {
                tool_call_id: id.clone(),
                name: name.clone(),
                success: true,
                content,
                error: None,
                execution_time: started.elapsed().as_secs_f64(),
            },
            Ok(Err(err)) => ToolExecution {
                execution_time: started.elapsed().as_secs_f64(),
                ..ToolExecution::failure(id, name, err.to_string())
            },
            Err(_) => ToolExecution::failure(
                id,
                name,
                format!(
                    "Tool execution timed out after {}s",
                    self.default_timeout.as_secs_f64()
                ),
            ),
        }
    }

    pub fn history(&self, session_id: Uuid) -> Vec<ToolExecution> {
        self.history
            .get(&session_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, session_id: Option<Uuid>) {
        match session_id {
            Some(id) => {
                self.history.remove(&id);
            }
            None => self.history.clear(),
        }
    }
}
