//! Ephemeral Docker containers for code execution
//!
//! One container per execution: create from the pre-built image, inject
//! the code as a single-file tar archive, start, wait with a hard
//! timeout, capture output, force-remove. The Docker client is fully
//! async (bollard), so nothing here blocks the scheduler.

use crate::models::{ExecutionRequest, ExecutionResult, ExecutionStatus};
use axon_core::{Error, Result, SandboxConfig};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TRUNCATION_MARKER: &str = "\n… [output truncated]";

enum WaitOutcome {
    Exited(i64),
    TimedOut,
}

/// Long-lived manager holding the process-wide Docker client. Each
/// `execute` call creates a short-lived throw-away container.
pub struct ContainerManager {
    docker: Docker,
    config: SandboxConfig,
}

impl ContainerManager {
    /// Connect to the daemon and verify the sandbox image exists.
    pub async fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::sandbox(format!("cannot connect to Docker: {e}")))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::sandbox(format!("Docker daemon unreachable: {e}")))?;
        info!("Docker daemon connected");

        docker.inspect_image(&config.image_name).await.map_err(|e| {
            Error::sandbox(format!(
                "sandbox image '{}' not found (build it before starting): {e}",
                config.image_name
            ))
        })?;

        Ok(Self { docker, config })
    }

    /// Run one request in a fresh container. Never returns an `Err`; every
    /// failure mode is folded into the `ExecutionResult`.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let name = format!("axon-sandbox-{}", Uuid::new_v4().simple());

        let outcome = self.run_in_container(&name, request).await;
        // The container is removed on every path, success or not.
        self.safe_remove(&name).await;

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(WaitOutcome::TimedOut) => ExecutionResult {
                status: ExecutionStatus::Timeout,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
                execution_time: elapsed,
                error: Some(format!("Execution timed out after {}s", request.timeout)),
                truncated: false,
            },
            Ok(WaitOutcome::Exited(exit_code)) => {
                let (stdout, stderr, truncated) = self.capture_output(&name).await;
                ExecutionResult {
                    status: if exit_code == 0 {
                        ExecutionStatus::Success
                    } else {
                        ExecutionStatus::Error
                    },
                    error: (exit_code != 0).then(|| stderr.clone()),
                    stdout,
                    stderr,
                    exit_code,
                    execution_time: elapsed,
                    truncated,
                }
            }
            Err(err) => {
                error!(error = %err, "sandbox execution error");
                ExecutionResult {
                    execution_time: elapsed,
                    ..ExecutionResult::error(format!("Sandbox error: {err}"))
                }
            }
        }
    }

    async fn run_in_container(
        &self,
        name: &str,
        request: &ExecutionRequest,
    ) -> Result<WaitOutcome> {
        let cfg = &self.config;

        let host_config = HostConfig {
            memory: Some(parse_memory_limit(&cfg.memory_limit)?),
            cpu_period: Some(cfg.cpu_period),
            cpu_quota: Some(cfg.cpu_quota),
            pids_limit: Some(cfg.pids_limit),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(cfg.image_name.clone()),
            cmd: Some(vec![
                "python".to_string(),
                "-u".to_string(),
                format!("{}/main.py", cfg.container_workdir),
            ]),
            working_dir: Some(cfg.container_workdir.clone()),
            network_disabled: Some(!(request.enable_network || cfg.network_enabled)),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions { name: name.to_string(), platform: None }),
                container_config,
            )
            .await
            .map_err(|e| Error::sandbox(format!("create container: {e}")))?;

        let archive = script_archive(&build_script(request))?;
        self.docker
            .upload_to_container(
                name,
                Some(UploadToContainerOptions {
                    path: cfg.container_workdir.clone(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| Error::sandbox(format!("inject code: {e}")))?;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::sandbox(format!("start container: {e}")))?;

        debug!(container = name, timeout = request.timeout, "container started");

        let mut wait_stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        let deadline = Duration::from_secs_f64(request.timeout.max(1.0));
        match tokio::time::timeout(deadline, wait_stream.next()).await {
            Err(_) => {
                self.safe_kill(name).await;
                Ok(WaitOutcome::TimedOut)
            }
            Ok(Some(Ok(response))) => Ok(WaitOutcome::Exited(response.status_code)),
            // A non-zero exit surfaces as a wait error carrying the code.
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                Ok(WaitOutcome::Exited(code))
            }
            Ok(Some(Err(e))) => Err(Error::sandbox(format!("wait failed: {e}"))),
            Ok(None) => Err(Error::sandbox("wait stream ended unexpectedly")),
        }
    }

    async fn capture_output(&self, name: &str) -> (String, String, bool) {
        let stdout = self.read_logs(name, true, false).await;
        let stderr = self.read_logs(name, false, true).await;

        let (stdout, out_truncated) = truncate_output(stdout, self.config.max_output_size);
        let (stderr, err_truncated) = truncate_output(stderr, self.config.max_output_size);
        (stdout, stderr, out_truncated || err_truncated)
    }

    async fn read_logs(&self, name: &str, stdout: bool, stderr: bool) -> String {
        let mut stream = self.docker.logs(
            name,
            Some(LogsOptions::<String> { stdout, stderr, ..Default::default() }),
        );

        let mut collected: Vec<u8> = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => collected.extend(output.into_bytes()),
                Err(e) => {
                    warn!(container = name, error = %e, "log read failed");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    async fn safe_kill(&self, name: &str) {
        if let Err(e) = self
            .docker
            .kill_container(name, None::<KillContainerOptions<String>>)
            .await
        {
            debug!(container = name, error = %e, "kill failed (may have exited)");
        }
    }

    async fn safe_remove(&self, name: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions { force: true, ..Default::default() }),
            )
            .await
        {
            debug!(container = name, error = %e, "remove failed (may not exist)");
        }
    }
}

/// Full script for the container: optional pip-install preamble, then the
/// user code.
pub(crate) fn build_script(request: &ExecutionRequest) -> String {
    if request.install_packages.is_empty() {
        return request.code.clone();
    }

    let packages = request
        .install_packages
        .iter()
        .map(|p| format!("{:?}", p))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "import subprocess as _sp, sys as _sys\n\
         _sp.check_call([_sys.executable, '-m', 'pip', 'install', '-q', {packages}])\n\
         del _sp, _sys\n\
         {}",
        request.code
    )
}

/// Single-file tar archive holding `main.py`. No volume mounts; the
/// container filesystem is ephemeral.
pub(crate) fn script_archive(script: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let body = script.as_bytes();
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);

    builder
        .append_data(&mut header, "main.py", body)
        .map_err(|e| Error::sandbox(format!("tar build: {e}")))?;
    builder
        .into_inner()
        .map_err(|e| Error::sandbox(format!("tar finish: {e}")))
}

/// Parse a Docker-style memory limit ("256m", "1g") into bytes.
pub(crate) fn parse_memory_limit(raw: &str) -> Result<i64> {
    let raw = raw.trim().to_lowercase();
    let (digits, multiplier) = match raw.chars().last() {
        Some('b') => (&raw[..raw.len() - 1], 1i64),
        Some('k') => (&raw[..raw.len() - 1], 1024),
        Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw.as_str(), 1),
    };
    digits
        .parse::<i64>()
        .map(|n| n * multiplier)
        .map_err(|_| Error::sandbox(format!("invalid memory limit '{raw}'")))
}

/// Truncate to `max` bytes (on a char boundary) with a trailing marker.
pub(crate) fn truncate_output(output: String, max: usize) -> (String, bool) {
    if output.len() <= max {
        return (output, false);
    }
    let mut cut = max;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = output[..cut].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    (truncated, true)
}
