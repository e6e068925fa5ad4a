// ABOUTME: Stats source backed by the Docker API streaming stats endpoint
// ABOUTME: Keeps one open stream per sandbox; the daemon paces the readings

use super::{PollResult, Reading, StatsPoll, StatsSource};
use crate::engine::SandboxHandle;
use crate::error::StatsSourceError;
use async_trait::async_trait;
use bollard::{
    container::{MemoryStatsStats, Stats, StatsOptions},
    errors::Error as BollardError,
    Docker,
};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

type StatsStream = BoxStream<'static, Result<Stats, BollardError>>;

pub struct DockerStatsStream {
    docker: Docker,
    streams: Mutex<HashMap<String, Arc<Mutex<StatsStream>>>>,
}

impl DockerStatsStream {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            streams: Mutex::new(HashMap::new()),
        }
    }

    async fn stream_for(&self, sandbox: &SandboxHandle) -> Arc<Mutex<StatsStream>> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(sandbox.id.clone())
            .or_insert_with(|| {
                debug!(sandbox = %sandbox.name, "Opening stats stream");
                let options = StatsOptions {
                    stream: true,
                    one_shot: false,
                };
                Arc::new(Mutex::new(
                    self.docker.stats(&sandbox.id, Some(options)).boxed(),
                ))
            })
            .clone()
    }
}

#[async_trait]
impl StatsSource for DockerStatsStream {
    async fn poll(&self, sandbox: &SandboxHandle) -> PollResult {
        let stream = self.stream_for(sandbox).await;
        let next = stream.lock().await.next().await;

        match next {
            None => Ok(StatsPoll::Gone),
            Some(Ok(stats)) => Ok(reading_from_stats(&stats)),
            Some(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => Ok(StatsPoll::Gone),
            Some(Err(e)) => {
                // A failed stream cannot be resumed; reopen it on the next poll
                self.release(sandbox).await;
                Err(StatsSourceError::Transient(e.to_string()))
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn release(&self, sandbox: &SandboxHandle) {
        self.streams.lock().await.remove(&sandbox.id);
    }
}

fn reading_from_stats(stats: &Stats) -> StatsPoll {
    let presystem = stats.precpu_stats.system_cpu_usage.unwrap_or(0);
    let Some(usage) = stats.memory_stats.usage else {
        return StatsPoll::NotReady;
    };
    if presystem == 0 {
        return StatsPoll::NotReady;
    }

    let cpu_percent = cpu_percent_from_deltas(
        stats.cpu_stats.cpu_usage.total_usage,
        stats.precpu_stats.cpu_usage.total_usage,
        stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        presystem,
        stats.cpu_stats.online_cpus.unwrap_or(1),
    );

    StatsPoll::Reading(Reading {
        cpu_percent,
        mem_used_mib: usage_without_cache(usage, inactive_file(stats)) as f64 / (1024.0 * 1024.0),
    })
}

fn inactive_file(stats: &Stats) -> Option<u64> {
    match stats.memory_stats.stats? {
        MemoryStatsStats::V1(v1) => Some(v1.total_inactive_file),
        MemoryStatsStats::V2(v2) => Some(v2.inactive_file),
    }
}

/// Memory usage as reported by `docker stats`, which leaves out reclaimable page cache
pub(crate) fn usage_without_cache(usage: u64, inactive_file: Option<u64>) -> u64 {
    match inactive_file {
        Some(cache) if cache < usage => usage - cache,
        _ => usage,
    }
}

/// CPU percentage as computed by `docker stats`
pub(crate) fn cpu_percent_from_deltas(
    total: u64,
    previous_total: u64,
    system: u64,
    previous_system: u64,
    online_cpus: u64,
) -> f64 {
    let cpu_delta = total.saturating_sub(previous_total);
    let system_delta = system.saturating_sub(previous_system);

    if system_delta > 0 {
        (cpu_delta as f64 / system_delta as f64) * 100.0 * online_cpus.max(1) as f64
    } else {
        0.0
    }
}
