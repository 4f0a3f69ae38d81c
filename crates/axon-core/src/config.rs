//! Runtime configuration
//!
//! Every knob has a serde default so a partial TOML file (or none at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Context budget per session, in tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    /// Compression kicks in once usage reaches this ratio of the budget.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,
    #[serde(default = "default_target_compression_ratio")]
    pub target_compression_ratio: f64,
    #[serde(default = "default_importance_decay_factor")]
    pub importance_decay_factor: f64,
    #[serde(default = "default_min_importance_threshold")]
    pub min_importance_threshold: f64,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            compression_threshold: default_compression_threshold(),
            target_compression_ratio: default_target_compression_ratio(),
            importance_decay_factor: default_importance_decay_factor(),
            min_importance_threshold: default_min_importance_threshold(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_iteration_timeout")]
    pub iteration_timeout_secs: u64,
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: default_iteration_timeout(),
            max_parallel_tools: default_max_parallel_tools(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_priority_levels")]
    pub priority_levels: u8,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority_levels: default_priority_levels(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_image_name")]
    pub image_name: String,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: f64,
    #[serde(default = "default_max_execution_timeout")]
    pub max_execution_timeout_secs: f64,
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default)]
    pub network_enabled: bool,
    #[serde(default = "default_container_workdir")]
    pub container_workdir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image_name: default_image_name(),
            execution_timeout_secs: default_execution_timeout(),
            max_execution_timeout_secs: default_max_execution_timeout(),
            max_output_size: default_max_output_size(),
            memory_limit: default_memory_limit(),
            cpu_period: default_cpu_period(),
            cpu_quota: default_cpu_quota(),
            pids_limit: default_pids_limit(),
            network_enabled: false,
            container_workdir: default_container_workdir(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub enable_builtin_discovery: bool,
    #[serde(default = "default_true")]
    pub enable_plugin_discovery: bool,
    #[serde(default = "default_plugin_group")]
    pub plugin_group: String,
    #[serde(default)]
    pub discovery_fail_fast: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_builtin_discovery: true,
            enable_plugin_discovery: true,
            plugin_group: default_plugin_group(),
            discovery_fail_fast: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8045/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_context_tokens() -> u32 {
    128_000
}
fn default_compression_threshold() -> f64 {
    0.92
}
fn default_target_compression_ratio() -> f64 {
    0.3
}
fn default_importance_decay_factor() -> f64 {
    0.95
}
fn default_min_importance_threshold() -> f64 {
    0.1
}
fn default_summary_max_tokens() -> u32 {
    500
}
fn default_max_iterations() -> u32 {
    10
}
fn default_iteration_timeout() -> u64 {
    300
}
fn default_max_parallel_tools() -> usize {
    5
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_priority_levels() -> u8 {
    5
}
fn default_max_queue_size() -> usize {
    10_000
}
fn default_image_name() -> String {
    "axon-sandbox:latest".to_string()
}
fn default_execution_timeout() -> f64 {
    30.0
}
fn default_max_execution_timeout() -> f64 {
    120.0
}
fn default_max_output_size() -> usize {
    65_536
}
fn default_memory_limit() -> String {
    "256m".to_string()
}
fn default_cpu_period() -> i64 {
    100_000
}
fn default_cpu_quota() -> i64 {
    50_000
}
fn default_pids_limit() -> i64 {
    64
}
fn default_container_workdir() -> String {
    "/workspace".to_string()
}
fn default_plugin_group() -> String {
    "axon.tools".to_string()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.memory.max_context_tokens, 128_000);
        assert_eq!(cfg.memory.compression_threshold, 0.92);
        assert_eq!(cfg.memory.target_compression_ratio, 0.3);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.max_parallel_tools, 5);
        assert_eq!(cfg.agent.tool_timeout_secs, 30);
        assert_eq!(cfg.queue.max_queue_size, 10_000);
        assert_eq!(cfg.sandbox.max_output_size, 65_536);
        assert_eq!(cfg.sandbox.pids_limit, 64);
        assert!(!cfg.sandbox.network_enabled);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = RuntimeConfig::from_toml_str(
            r#"
            [memory]
            max_context_tokens = 2000
            compression_threshold = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.memory.max_context_tokens, 2000);
        assert_eq!(cfg.memory.compression_threshold, 0.5);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.sandbox.memory_limit, "256m");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = RuntimeConfig::from_toml_str("not = [valid").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
