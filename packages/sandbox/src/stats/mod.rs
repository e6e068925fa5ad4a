// ABOUTME: Stats source abstraction for point-in-time sandbox resource readings
// ABOUTME: Includes parsers for the `docker stats` CPU and memory text format

use crate::engine::SandboxHandle;
use crate::error::StatsSourceError;
use crate::settings::{RunnerSettings, StatsMode};
use async_trait::async_trait;
use bollard::Docker;
use std::sync::Arc;
use std::time::Duration;

pub mod cli;
pub mod stream;

pub use cli::DockerCliStats;
pub use stream::DockerStatsStream;

/// Default interval between two polls of a stats source
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// One raw reading; values may be NaN when the source text was unparsable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub cpu_percent: f64,
    pub mem_used_mib: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsPoll {
    Reading(Reading),
    /// No data yet, try again on the next tick
    NotReady,
    /// The sandbox no longer exists
    Gone,
}

pub type PollResult = std::result::Result<StatsPoll, StatsSourceError>;

/// Capability returning the latest resource reading of a running sandbox
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn poll(&self, sandbox: &SandboxHandle) -> PollResult;

    /// Pause between polls; zero when the source paces itself
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Drop any per-sandbox state held by the source
    async fn release(&self, _sandbox: &SandboxHandle) {}
}

/// Build the stats source selected by `settings`
pub fn from_settings(settings: &RunnerSettings, docker: &Docker) -> Arc<dyn StatsSource> {
    match settings.stats_mode {
        StatsMode::Cli => Arc::new(
            DockerCliStats::new(settings.docker_binary.clone()).with_interval(settings.poll_interval),
        ),
        StatsMode::Stream => Arc::new(DockerStatsStream::new(docker.clone())),
    }
}

/// Parse a `"<cpu>%,<used> / <limit>"` line as printed by `docker stats`
pub fn parse_stats_line(line: &str) -> PollResult {
    let line = line.trim();
    if line.is_empty() || line.contains("--") {
        return Ok(StatsPoll::NotReady);
    }

    let (cpu, mem) = line.split_once(',').ok_or_else(|| {
        StatsSourceError::Transient(format!("unexpected stats line: {:?}", line))
    })?;

    let used = mem.split('/').next().unwrap_or_default();

    Ok(StatsPoll::Reading(Reading {
        cpu_percent: parse_cpu_percent(cpu),
        mem_used_mib: parse_mem_mib(used),
    }))
}

/// `"12.5%"` → 12.5; NaN when unparsable so the sample is skipped downstream
pub fn parse_cpu_percent(text: &str) -> f64 {
    text.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .unwrap_or(f64::NAN)
}

/// Parse a memory amount such as `"10.5MiB"` into MiB
///
/// Units are matched case-insensitively. A bare number is taken as bytes.
/// Anything unparsable yields `0.0`.
pub fn parse_mem_mib(text: &str) -> f64 {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value = match number.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => return 0.0,
    };

    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0 / BYTES_PER_MIB,
        "kib" => 1.0 / 1024.0,
        "mib" => 1.0,
        "gib" => 1024.0,
        "tib" => 1024.0 * 1024.0,
        "kb" => 1_000.0 / BYTES_PER_MIB,
        "mb" => 1_000_000.0 / BYTES_PER_MIB,
        "gb" => 1_000_000_000.0 / BYTES_PER_MIB,
        _ => return 0.0,
    };

    value * factor
}
