//! Tool trait and registry
//!
//! Each tool is a self-contained module implementing the Tool trait.
//! Built-ins live under tools/ and are assembled by discovery; external
//! providers come in through the PluginRegistry.

use axon_core::Result;
use axon_llm::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A capability the model can invoke by name.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "calculator", "python_executor").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    /// Required parameter names, when not already embedded in the schema.
    fn required(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute with already-parsed JSON arguments. Errors are materialized
    /// by the executor; they never propagate past it.
    async fn execute(&self, args: Value) -> Result<String>;

    /// Chat-completions tool definition.
    fn to_spec(&self) -> ToolSpec {
        let mut parameters = self.parameters();
        let required = self.required();
        if !required.is_empty() {
            if let Some(obj) = parameters.as_object_mut() {
                obj.entry("required")
                    .or_insert_with(|| serde_json::json!(required));
            }
        }
        ToolSpec::function(self.name(), self.description(), parameters)
    }
}

/// Name-keyed tool collection.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    // Registration order, for stable spec listings.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A duplicate name is dropped with a warning; the
    /// first registration wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool_name = %name, "duplicate tool name ignored");
            return false;
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        true
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        if self.tools.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Tool definitions for the LLM request, in registration order.
    pub fn to_specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.to_spec())
            .collect()
    }
}
