//! Sandbox I/O types

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    SecurityBlocked,
}

/// Request to run Python code in the sandbox.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub code: String,
    /// Seconds; already clamped by the executor facade.
    pub timeout: f64,
    pub install_packages: Vec<String>,
    pub enable_network: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: 30.0,
            install_packages: Vec::new(),
            enable_network: false,
        }
    }
}

/// Result of one sandbox execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            execution_time: 0.0,
            error: Some(message.into()),
            truncated: false,
        }
    }

    pub fn security_blocked(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::SecurityBlocked,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            execution_time: 0.0,
            error: Some(reason.into()),
            truncated: false,
        }
    }
}

/// Result of the AST pre-check.
#[derive(Clone, Debug, Default)]
pub struct SecurityCheckResult {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub blocked_reason: Option<String>,
}

impl SecurityCheckResult {
    pub fn pass(warnings: Vec<String>) -> Self {
        Self { passed: true, warnings, blocked_reason: None }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self { passed: false, warnings: Vec::new(), blocked_reason: Some(reason.into()) }
    }
}
