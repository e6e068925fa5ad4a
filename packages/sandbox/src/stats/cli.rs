// ABOUTME: Stats source backed by one-shot `docker stats --no-stream` invocations
// ABOUTME: Classifies CLI failures into gone, transient and unavailable outcomes

use super::{parse_stats_line, PollResult, StatsPoll, StatsSource, DEFAULT_POLL_INTERVAL};
use crate::engine::SandboxHandle;
use crate::error::StatsSourceError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const STATS_FORMAT: &str = "{{.CPUPerc}},{{.MemUsage}}";

pub struct DockerCliStats {
    binary: String,
    interval: Duration,
}

impl DockerCliStats {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for DockerCliStats {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl StatsSource for DockerCliStats {
    async fn poll(&self, sandbox: &SandboxHandle) -> PollResult {
        let output = Command::new(&self.binary)
            .args(["stats", "--no-stream", "--format", STATS_FORMAT, &sandbox.id])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StatsSourceError::Unavailable(format!("cannot run {}: {}", self.binary, e))
                }
                _ => StatsSourceError::Transient(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(sandbox = %sandbox.name, "docker stats failed: {}", stderr.trim());
            return classify_failure(&stderr);
        }

        parse_stats_line(&String::from_utf8_lossy(&output.stdout))
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}

fn classify_failure(stderr: &str) -> PollResult {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("not found") {
        Ok(StatsPoll::Gone)
    } else if lower.contains("cannot connect to the docker daemon") {
        Err(StatsSourceError::Unavailable(stderr.trim().to_string()))
    } else {
        Err(StatsSourceError::Transient(stderr.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("Error response from daemon: No such container: abc"),
            Ok(StatsPoll::Gone)
        );
        assert!(matches!(
            classify_failure(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock."
            ),
            Err(StatsSourceError::Unavailable(_))
        ));
        assert!(matches!(
            classify_failure("context deadline exceeded"),
            Err(StatsSourceError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let source = DockerCliStats::new("/nonexistent/ecorun-docker");
        let handle = SandboxHandle {
            id: "abc".to_string(),
            name: "ecorun-sandbox-abc".to_string(),
        };

        let result = source.poll(&handle).await;
        assert!(matches!(result, Err(StatsSourceError::Unavailable(_))));
    }

    #[test]
    fn test_interval_override() {
        let source = DockerCliStats::default().with_interval(Duration::from_millis(250));
        assert_eq!(source.poll_interval(), Duration::from_millis(250));
    }
}
