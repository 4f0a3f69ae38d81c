//! Tool discovery: explicit built-in lists plus a plugin registry
//!
//! Discovery is a builder step, not runtime introspection: built-ins are
//! an enumerated constructor list, external providers register factories
//! under a group name before the registry is assembled.

use crate::registry::{Tool, ToolRegistry};
use crate::tools::{
    CalculatorTool, DateTimeTool, ManageTodoListTool, PythonExecutorTool, SearchTool,
};
use axon_core::{Result, ToolsConfig};
use axon_sandbox::CodeExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// A provider factory: yields tool instances, or fails (which is logged
/// and non-fatal unless `discovery_fail_fast` is set).
pub type ToolFactory = Arc<dyn Fn() -> Result<Vec<Arc<dyn Tool>>> + Send + Sync>;

/// External tool providers, keyed by group name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    groups: HashMap<String, Vec<(String, ToolFactory)>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, group: &str, provider: &str, factory: ToolFactory) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push((provider.to_string(), factory));
    }

    fn providers(&self, group: &str) -> &[(String, ToolFactory)] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The enumerated built-in tool set. `python_executor` joins only when a
/// sandbox executor is supplied.
pub fn builtin_tools(sandbox: Option<Arc<CodeExecutor>>) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CalculatorTool),
        Arc::new(DateTimeTool),
        Arc::new(SearchTool),
        Arc::new(ManageTodoListTool),
    ];
    if let Some(executor) = sandbox {
        tools.push(Arc::new(PythonExecutorTool::new(executor)));
    }
    tools
}

/// Assemble a registry from built-ins and the configured plugin group.
/// Duplicate names are dropped with a warning (first registration wins).
pub fn discover_tools(
    config: &ToolsConfig,
    sandbox: Option<Arc<CodeExecutor>>,
    plugins: &PluginRegistry,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if config.enable_builtin_discovery {
        for tool in builtin_tools(sandbox) {
            registry.register(tool);
        }
    }

    if config.enable_plugin_discovery {
        for (provider, factory) in plugins.providers(&config.plugin_group) {
            match factory() {
                Ok(tools) => {
                    for tool in tools {
                        registry.register(tool);
                    }
                }
                Err(err) => {
                    error!(
                        provider = %provider,
                        group = %config.plugin_group,
                        error = %err,
                        "external tool provider failed"
                    );
                    if config.discovery_fail_fast {
                        return Err(err);
                    }
                }
            }
        }
    }

    info!(
        count = registry.len(),
        builtin = config.enable_builtin_discovery,
        plugins = config.enable_plugin_discovery,
        group = %config.plugin_group,
        "tool discovery completed"
    );
    Ok(registry)
}
