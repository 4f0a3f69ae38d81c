//! Python code execution tool backed by the Docker sandbox

use crate::registry::Tool;
use axon_core::{Error, Result};
use axon_sandbox::{CodeExecutor, ExecutionRequest, ExecutionStatus};
use serde_json::Value;
use std::sync::Arc;

pub struct PythonExecutorTool {
    executor: Arc<CodeExecutor>,
}

impl PythonExecutorTool {
    pub fn new(executor: Arc<CodeExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait::async_trait]
impl Tool for PythonExecutorTool {
    fn name(&self) -> &str {
        "python_executor"
    }

    fn description(&self) -> &str {
        "Execute Python code in an isolated Docker sandbox and return stdout/stderr. \
         Pre-installed packages: numpy, pandas, matplotlib, sympy, scipy, requests. \
         Use for: mathematical computation, data analysis, chart generation, \
         algorithm verification, or any task that benefits from running real code. \
         The code's standard output will be captured and returned as the result."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source code to execute"
                },
                "install_packages": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Extra pip packages to install before running (optional). \
                                    Only use this for packages not already pre-installed."
                },
                "timeout": {
                    "type": "number",
                    "description": "Execution timeout in seconds (default 30, max 120)"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::tool("python_executor", "missing 'code' argument"))?;

        let install_packages = args
            .get("install_packages")
            .and_then(Value::as_array)
            .map(|pkgs| {
                pkgs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let timeout = args
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(self.executor.config().execution_timeout_secs);

        let result = self
            .executor
            .execute(ExecutionRequest {
                code: code.to_string(),
                timeout,
                install_packages,
                enable_network: false,
            })
            .await;

        if result.status == ExecutionStatus::SecurityBlocked {
            return Ok(format!(
                "Security check failed: {}",
                result.error.as_deref().unwrap_or("blocked")
            ));
        }
        if result.status == ExecutionStatus::Timeout {
            return Ok(format!(
                "Execution timed out after {timeout:.0}s. \
                 Consider optimising your code or increasing the timeout."
            ));
        }

        let mut parts: Vec<String> = Vec::new();
        if !result.stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", result.stdout));
        }
        if !result.stderr.is_empty() {
            let label = if result.exit_code != 0 { "STDERR" } else { "WARNINGS" };
            parts.push(format!("{label}:\n{}", result.stderr));
        }
        if result.exit_code != 0 {
            parts.push(format!("Exit code: {}", result.exit_code));
        }
        if parts.is_empty() {
            parts.push("(no output)".to_string());
        }
        if result.truncated {
            parts.push("[Output was truncated due to size limit]".to_string());
        }
        parts.push(format!("Execution time: {:.2}s", result.execution_time));

        Ok(parts.join("\n\n"))
    }
}
