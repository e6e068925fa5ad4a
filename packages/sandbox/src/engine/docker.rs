// ABOUTME: Docker implementation of the sandbox engine
// ABOUTME: Uses bollard to build the image and run hardened, network-less sandbox containers

use super::{ImageSpec, SandboxEngine, SandboxHandle, SandboxInfo, SandboxSpec, MANAGED_LABEL};
use crate::error::{Result, SandboxError};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::BuildImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Connection(e.to_string()))?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            SandboxError::Connection(e.to_string())
        })?;

        info!("Successfully connected to Docker daemon");
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }

    /// Convert a sandbox spec into a bollard container config
    ///
    /// Networking is disabled, all capabilities are dropped and swap is
    /// capped at the memory limit.
    pub(crate) fn container_config(spec: &SandboxSpec) -> Config<String> {
        let host_config = HostConfig {
            binds: Some(vec![spec.bind()]),
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_bytes),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            network_mode: Some("none".to_string()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            cap_drop: Some(vec!["ALL".to_string()]),
            privileged: Some(false),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.mount_path.clone()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(true),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn build_image(&self, image: &ImageSpec) -> Result<()> {
        let dockerfile = image.build_context.join(&image.dockerfile);
        if !dockerfile.is_file() {
            return Err(SandboxError::Build(format!(
                "image {} is missing and no Dockerfile was found at {}",
                image.name,
                dockerfile.display()
            )));
        }

        info!("Building image {} from {}", image.name, dockerfile.display());

        let context = image.build_context.clone();
        let tar_data = tokio::task::spawn_blocking(move || create_tar_archive(&context))
            .await
            .map_err(|e| SandboxError::Build(format!("build context task failed: {}", e)))?
            .map_err(|e| SandboxError::Build(format!("failed to package build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: image.dockerfile.clone(),
            t: image.name.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = Box::pin(self.docker.build_image(options, None, Some(tar_data.into())));
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                        if !line.is_empty() {
                            debug!("build: {}", line);
                        }
                    }
                    if let Some(message) = info.error {
                        return Err(SandboxError::Build(message));
                    }
                }
                Err(e) => return Err(SandboxError::Build(e.to_string())),
            }
        }

        info!("Built image {}", image.name);
        Ok(())
    }
}

#[async_trait]
impl SandboxEngine for DockerEngine {
    async fn ensure_image(&self, image: &ImageSpec) -> Result<()> {
        if self.image_exists(&image.name).await? {
            debug!("Image {} already present", image.name);
            return Ok(());
        }

        if let Err(e) = self.build_image(image).await {
            // A concurrent execution may have built it in the meantime
            if self.image_exists(&image.name).await.unwrap_or(false) {
                warn!("Build of {} failed but the image now exists: {}", image.name, e);
                return Ok(());
            }
            error!("Failed to build image {}: {}", image.name, e);
            return Err(e);
        }
        Ok(())
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        info!("Creating sandbox {} from {}", spec.name, spec.image);

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", spec.name, warning);
        }

        let handle = SandboxHandle {
            id: container.id,
            name: spec.name.clone(),
        };

        if let Err(e) = self
            .docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
        {
            error!("Failed to start sandbox {}: {}", handle.name, e);
            if let Err(remove_err) = self.remove(&handle).await {
                warn!(
                    "Failed to remove unstarted sandbox {}: {}",
                    handle.name, remove_err
                );
            }
            return Err(SandboxError::StartFailed(e.to_string()));
        }

        info!("Started sandbox {} ({})", handle.name, handle.id);
        Ok(handle)
    }

    async fn wait(&self, handle: &SandboxHandle, timeout: Duration) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = Box::pin(self.docker.wait_container(&handle.id, Some(options)));

        match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => Err(SandboxError::Timeout {
                seconds: timeout.as_secs(),
            }),
            Ok(Some(Ok(response))) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => Ok(code),
            Ok(Some(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }))) => Err(SandboxError::NotFound(handle.name.clone())),
            Ok(Some(Err(e))) => Err(SandboxError::WaitFailed(e.to_string())),
            Ok(None) => Err(SandboxError::WaitFailed(
                "wait stream ended without an exit status".to_string(),
            )),
        }
    }

    async fn logs(&self, handle: &SandboxHandle) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut stream = Box::pin(self.docker.logs(&handle.id, Some(options)));
        let mut buffer = Vec::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => buffer.extend_from_slice(&message),
                Ok(LogOutput::StdIn { .. }) => {}
                Err(BollardError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Err(SandboxError::NotFound(handle.name.clone())),
                Err(e) => return Err(SandboxError::Docker(e)),
            }
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn is_running(&self, handle: &SandboxHandle) -> Result<bool> {
        match self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(SandboxError::NotFound(handle.name.clone())),
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn stop(&self, handle: &SandboxHandle, grace: Duration) -> Result<()> {
        debug!("Stopping sandbox {} (grace: {:?})", handle.name, grace);

        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(&handle.id, Some(options)).await {
            Ok(()) => {
                info!("Stopped sandbox {}", handle.name);
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Sandbox {} already stopped", handle.name);
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Sandbox {} already gone", handle.name);
                Ok(())
            }
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(&handle.id, Some(options)).await {
            Ok(()) => {
                info!("Removed sandbox {}", handle.name);
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Sandbox {} already removed", handle.name);
                Ok(())
            }
            Err(e) => Err(SandboxError::Docker(e)),
        }
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxInfo>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        )]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                let name = container
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(SandboxInfo {
                    id,
                    name,
                    state: container.state.unwrap_or_else(|| "unknown".to_string()),
                })
            })
            .collect())
    }
}

fn create_tar_archive(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.append_dir_all(".", context)?;
    archive.into_inner()
}
