// ABOUTME: Sandbox engine trait and container specifications
// ABOUTME: Abstract interface over the container runtime used to run untrusted code

use crate::error::Result;
use crate::types::ExecutionRequest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod docker;

pub use docker::DockerEngine;

/// Label marking containers created by this crate
pub const MANAGED_LABEL: &str = "ecorun.managed";
/// Label carrying the sandbox name of the execution that owns a container
pub const EXECUTION_LABEL: &str = "ecorun.execution";

/// Where the sandbox image comes from when it is not present locally
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSpec {
    pub name: String,
    pub build_context: PathBuf,
    /// Dockerfile path relative to the build context
    pub dockerfile: String,
}

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host directory bind-mounted read-only at `mount_path`
    pub code_dir: PathBuf,
    pub mount_path: String,
    pub user: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub labels: HashMap<String, String>,
}

impl SandboxSpec {
    pub fn for_request(
        name: &str,
        image: &str,
        mount_path: &str,
        user: &str,
        code_dir: &Path,
        request: &ExecutionRequest,
    ) -> Self {
        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (EXECUTION_LABEL.to_string(), name.to_string()),
        ]);

        Self {
            name: name.to_string(),
            image: image.to_string(),
            command: request.command(),
            code_dir: code_dir.to_path_buf(),
            mount_path: mount_path.to_string(),
            user: user.to_string(),
            // Callers validate the request first, which rejects an unrepresentable limit.
            memory_bytes: request.limits.memory_bytes().unwrap_or(i64::MAX),
            cpu_quota: request.limits.cpu_quota,
            cpu_period: request.limits.cpu_period,
            labels,
        }
    }

    /// Bind string in `host:container:ro` form
    pub fn bind(&self) -> String {
        format!("{}:{}:ro", self.code_dir.display(), self.mount_path)
    }
}

/// Reference to a started sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

/// Listing entry for sandboxes carrying the managed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInfo {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// Container runtime operations needed to run one sandboxed execution
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Make sure the sandbox image exists, building it when missing
    async fn ensure_image(&self, image: &ImageSpec) -> Result<()>;

    /// Create and start a sandbox
    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxHandle>;

    /// Wait for the sandbox to stop and return its exit status code
    ///
    /// Fails with `SandboxError::Timeout` when `timeout` elapses first.
    async fn wait(&self, handle: &SandboxHandle, timeout: Duration) -> Result<i64>;

    /// Combined stdout and stderr of the sandbox
    async fn logs(&self, handle: &SandboxHandle) -> Result<String>;

    /// Whether the sandbox is still running; `NotFound` once it is gone
    async fn is_running(&self, handle: &SandboxHandle) -> Result<bool>;

    /// Stop the sandbox, killing it after `grace`
    async fn stop(&self, handle: &SandboxHandle, grace: Duration) -> Result<()>;

    /// Force-remove the sandbox and its anonymous volumes
    async fn remove(&self, handle: &SandboxHandle) -> Result<()>;

    /// Sandboxes carrying the managed label, running or not
    async fn list_sandboxes(&self) -> Result<Vec<SandboxInfo>>;
}
