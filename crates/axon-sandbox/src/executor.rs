//! Code execution facade: security pre-check, timeout clamping, container
//! dispatch.

use crate::container::ContainerManager;
use crate::models::{ExecutionRequest, ExecutionResult};
use crate::security::SecurityChecker;
use axon_core::SandboxConfig;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Single entry point for the `python_executor` tool.
///
/// The Docker connection is established lazily on the first execution
/// that passes the pre-check, so a blocked submission never touches the
/// daemon and the checker works without Docker present.
pub struct CodeExecutor {
    config: SandboxConfig,
    checker: SecurityChecker,
    manager: OnceCell<ContainerManager>,
}

impl CodeExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            checker: SecurityChecker::new(),
            manager: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Validate and execute Python code.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let check = self.checker.validate(&request.code);
        if !check.passed {
            let reason = check
                .blocked_reason
                .unwrap_or_else(|| "blocked".to_string());
            warn!(reason, "code blocked by security checker");
            return ExecutionResult::security_blocked(reason);
        }
        if !check.warnings.is_empty() {
            info!(warnings = ?check.warnings, "security warnings (informational)");
        }

        let timeout = request
            .timeout
            .min(self.config.max_execution_timeout_secs)
            .max(1.0);
        let request = ExecutionRequest { timeout, ..request };

        let manager = match self
            .manager
            .get_or_try_init(|| ContainerManager::connect(self.config.clone()))
            .await
        {
            Ok(manager) => manager,
            Err(err) => return ExecutionResult::error(err.to_string()),
        };

        let result = manager.execute(&request).await;
        info!(
            status = ?result.status,
            exit_code = result.exit_code,
            duration = format!("{:.2}s", result.execution_time),
            "code execution finished"
        );
        result
    }
}
