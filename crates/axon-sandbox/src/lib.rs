//! axon-sandbox: two-stage Python execution sandbox.
//!
//! Stage 1 is an in-process AST pre-check (syntax validation, blocked
//! modules, dangerous-call warnings). Stage 2 runs the code in an
//! ephemeral Docker container with CPU, memory, PID, and network limits.

pub mod container;
pub mod executor;
pub mod models;
pub mod security;

pub use container::ContainerManager;
pub use executor::CodeExecutor;
pub use models::{ExecutionRequest, ExecutionResult, ExecutionStatus, SecurityCheckResult};
pub use security::SecurityChecker;
