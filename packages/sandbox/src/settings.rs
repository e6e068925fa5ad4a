// ABOUTME: Runner settings resolved from defaults and environment variables
// ABOUTME: Image, naming, mount, monitoring cadence and stats backend selection

use crate::engine::ImageSpec;
use ecorun_config::constants::*;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stats mode: {0} (expected `cli` or `stream`)")]
pub struct InvalidStatsMode(pub String);

/// Backend used to sample sandbox resource usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsMode {
    /// One-shot `docker stats --no-stream` invocations
    Cli,
    /// Streaming stats from the Docker API
    #[default]
    Stream,
}

impl FromStr for StatsMode {
    type Err = InvalidStatsMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cli" => Ok(StatsMode::Cli),
            "stream" | "api" => Ok(StatsMode::Stream),
            _ => Err(InvalidStatsMode(s.to_string())),
        }
    }
}

impl fmt::Display for StatsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsMode::Cli => write!(f, "cli"),
            StatsMode::Stream => write!(f, "stream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub image: String,
    /// Directory used as the build context when the image is missing
    pub build_context: String,
    /// Dockerfile path relative to the build context
    pub dockerfile: String,
    pub container_prefix: String,
    pub mount_path: String,
    pub sandbox_user: String,
    pub poll_interval: Duration,
    pub transient_backoff: Duration,
    pub monitor_join_grace: Duration,
    pub stop_grace: Duration,
    pub stats_mode: StatsMode,
    pub docker_binary: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            image: "python-sandbox:latest".to_string(),
            build_context: "docker".to_string(),
            dockerfile: "python-sandbox.Dockerfile".to_string(),
            container_prefix: "ecorun-sandbox-".to_string(),
            mount_path: "/app".to_string(),
            sandbox_user: "appuser".to_string(),
            poll_interval: Duration::from_secs(1),
            transient_backoff: Duration::from_millis(500),
            monitor_join_grace: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            stats_mode: StatsMode::Stream,
            docker_binary: "docker".to_string(),
        }
    }
}

impl RunnerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through an arbitrary key lookup
    ///
    /// Out-of-range or unparsable numbers fall back to the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, fallback: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
        };

        let stats_mode = match lookup(ECORUN_STATS_MODE) {
            Some(raw) => raw.parse::<StatsMode>().unwrap_or_else(|e| {
                warn!("{}, using {}", e, defaults.stats_mode);
                defaults.stats_mode
            }),
            None => defaults.stats_mode,
        };

        Self {
            image: text(ECORUN_IMAGE, defaults.image),
            build_context: text(ECORUN_BUILD_CONTEXT, defaults.build_context),
            dockerfile: text(ECORUN_DOCKERFILE, defaults.dockerfile),
            container_prefix: text(ECORUN_CONTAINER_PREFIX, defaults.container_prefix),
            mount_path: text(ECORUN_MOUNT_PATH, defaults.mount_path),
            sandbox_user: text(ECORUN_SANDBOX_USER, defaults.sandbox_user),
            poll_interval: Duration::from_millis(ranged(
                &lookup,
                ECORUN_POLL_INTERVAL_MS,
                100..=60_000,
                1_000,
            )),
            transient_backoff: Duration::from_millis(ranged(
                &lookup,
                ECORUN_TRANSIENT_BACKOFF_MS,
                10..=10_000,
                500,
            )),
            monitor_join_grace: Duration::from_secs(ranged(
                &lookup,
                ECORUN_MONITOR_JOIN_GRACE_SECS,
                1..=60,
                5,
            )),
            stop_grace: Duration::from_secs(ranged(&lookup, ECORUN_STOP_GRACE_SECS, 0..=300, 10)),
            stats_mode,
            docker_binary: text(ECORUN_DOCKER_BIN, defaults.docker_binary),
        }
    }

    pub fn image_spec(&self) -> ImageSpec {
        ImageSpec {
            name: self.image.clone(),
            build_context: self.build_context.clone().into(),
            dockerfile: self.dockerfile.clone(),
        }
    }
}

fn ranged<F>(lookup: &F, key: &str, range: std::ops::RangeInclusive<u64>, fallback: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => fallback,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if range.contains(&value) => value,
            _ => {
                warn!(
                    "Ignoring {}={:?}: expected an integer in {}..={}, using {}",
                    key,
                    raw,
                    range.start(),
                    range.end(),
                    fallback
                );
                fallback
            }
        },
    }
}
