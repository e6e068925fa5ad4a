// ABOUTME: Resource monitoring for a single running sandbox
// ABOUTME: Polls a stats source into a shared sample buffer until cancelled or the sandbox is gone

use crate::engine::SandboxHandle;
use crate::error::StatsSourceError;
use crate::stats::{StatsPoll, StatsSource};
use crate::types::Sample;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default pause after a failed stats query
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_millis(500);

/// Append-only sample sequence shared between the monitor and its owner
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Vec<Sample>>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, clamping its timestamp so the sequence never goes backwards
    pub async fn push(&self, mut sample: Sample) {
        let mut samples = self.inner.lock().await;
        if let Some(last) = samples.last() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }
        samples.push(sample);
    }

    pub async fn snapshot(&self) -> Vec<Sample> {
        self.inner.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Why the monitor loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    Cancelled,
    SandboxGone,
    /// The stats source cannot be used; samples for this run are incomplete
    SourceUnavailable(String),
}

pub struct ResourceMonitor {
    source: Arc<dyn StatsSource>,
    buffer: SampleBuffer,
    cancel: CancellationToken,
    backoff: Duration,
}

impl ResourceMonitor {
    pub fn new(source: Arc<dyn StatsSource>, buffer: SampleBuffer, cancel: CancellationToken) -> Self {
        Self {
            source,
            buffer,
            cancel,
            backoff: DEFAULT_TRANSIENT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start monitoring `sandbox` on a background task
    pub fn spawn(self, sandbox: SandboxHandle) -> JoinHandle<MonitorExit> {
        tokio::spawn(self.run(sandbox))
    }

    pub async fn run(self, sandbox: SandboxHandle) -> MonitorExit {
        let interval = self.source.poll_interval();
        info!(sandbox = %sandbox.name, ?interval, "Resource monitor started");

        let exit = loop {
            if self.cancel.is_cancelled() {
                break MonitorExit::Cancelled;
            }

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break MonitorExit::Cancelled,
                polled = self.source.poll(&sandbox) => polled,
            };

            match polled {
                Ok(StatsPoll::Reading(reading)) => {
                    if self.cancel.is_cancelled() {
                        break MonitorExit::Cancelled;
                    }
                    self.buffer
                        .push(Sample {
                            timestamp: Utc::now(),
                            cpu_percent: reading.cpu_percent,
                            mem_used_mib: reading.mem_used_mib,
                        })
                        .await;
                }
                Ok(StatsPoll::NotReady) => {
                    debug!(sandbox = %sandbox.name, "Stats not ready yet");
                }
                Ok(StatsPoll::Gone) => {
                    debug!(sandbox = %sandbox.name, "Sandbox gone, stopping monitor");
                    break MonitorExit::SandboxGone;
                }
                Err(StatsSourceError::Transient(message)) => {
                    warn!(sandbox = %sandbox.name, "Stats query failed: {}", message);
                    if !self.pause(self.backoff).await {
                        break MonitorExit::Cancelled;
                    }
                    continue;
                }
                Err(StatsSourceError::Unavailable(message)) => {
                    error!(sandbox = %sandbox.name, "Stats source unavailable: {}", message);
                    self.cancel.cancel();
                    break MonitorExit::SourceUnavailable(message);
                }
            }

            if !self.pause(interval).await {
                break MonitorExit::Cancelled;
            }
        };

        self.source.release(&sandbox).await;
        let samples = self.buffer.len().await;
        info!(
            sandbox = %sandbox.name,
            samples,
            "Resource monitor stopped: {:?}",
            exit
        );
        exit
    }

    /// Sleep for `duration`; false when cancelled first
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{PollResult, Reading};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back a script of poll results, then keeps returning the fallback
    struct Scripted {
        script: std::sync::Mutex<VecDeque<PollResult>>,
        fallback: PollResult,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<PollResult>, fallback: PollResult) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatsSource for Scripted {
        async fn poll(&self, _sandbox: &SandboxHandle) -> PollResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn reading(cpu: f64, mem: f64) -> PollResult {
        Ok(StatsPoll::Reading(Reading {
            cpu_percent: cpu,
            mem_used_mib: mem,
        }))
    }

    fn handle() -> SandboxHandle {
        SandboxHandle {
            id: "id".to_string(),
            name: "ecorun-sandbox-test".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_until_gone() {
        let source = Scripted::new(
            vec![reading(10.0, 20.0), Ok(StatsPoll::NotReady), reading(30.0, 40.0)],
            Ok(StatsPoll::Gone),
        );
        let buffer = SampleBuffer::new();
        let monitor = ResourceMonitor::new(source, buffer.clone(), CancellationToken::new());

        let exit = monitor.spawn(handle()).await.unwrap();

        assert_eq!(exit, MonitorExit::SandboxGone);
        let samples = buffer.snapshot().await;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].cpu_percent, 10.0);
        assert_eq!(samples[1].mem_used_mib, 40.0);
        assert!(samples[0].timestamp <= samples[1].timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_within_one_interval_after_cancel() {
        let source = Scripted::new(vec![], reading(5.0, 5.0));
        let buffer = SampleBuffer::new();
        let cancel = CancellationToken::new();
        let task = ResourceMonitor::new(source, buffer.clone(), cancel.clone()).spawn(handle());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        let collected = buffer.len().await;

        let exit = tokio::time::timeout(Duration::from_millis(1_100), task)
            .await
            .expect("monitor should exit within one poll interval")
            .unwrap();

        assert_eq!(exit, MonitorExit::Cancelled);
        assert_eq!(collected, 4);
        assert_eq!(buffer.len().await, collected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_and_continue() {
        let source = Scripted::new(
            vec![
                Err(StatsSourceError::Transient("flaky".into())),
                Err(StatsSourceError::Transient("flaky".into())),
                reading(1.0, 1.0),
            ],
            Ok(StatsPoll::Gone),
        );
        let buffer = SampleBuffer::new();
        let monitor = ResourceMonitor::new(source.clone(), buffer.clone(), CancellationToken::new())
            .with_backoff(Duration::from_millis(500));

        let exit = monitor.run(handle()).await;

        assert_eq!(exit, MonitorExit::SandboxGone);
        assert_eq!(buffer.len().await, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_source_cancels_itself() {
        let source = Scripted::new(
            vec![reading(1.0, 1.0)],
            Err(StatsSourceError::Unavailable("docker missing".into())),
        );
        let buffer = SampleBuffer::new();
        let cancel = CancellationToken::new();

        let exit = ResourceMonitor::new(source, buffer.clone(), cancel.clone())
            .run(handle())
            .await;

        assert_eq!(exit, MonitorExit::SourceUnavailable("docker missing".into()));
        assert!(cancel.is_cancelled());
        assert_eq!(buffer.len().await, 1);
    }

    #[test]
    fn test_monitor_future_can_be_spawned() {
        fn assert_send<T: Send + 'static>(_: &T) {}

        let source = Scripted::new(vec![], Ok(StatsPoll::Gone));
        let monitor = ResourceMonitor::new(source, SampleBuffer::new(), CancellationToken::new());
        let future = monitor.run(handle());
        assert_send(&future);
    }

    #[tokio::test]
    async fn test_buffer_timestamps_never_decrease() {
        let buffer = SampleBuffer::new();
        let now = Utc::now();
        buffer
            .push(Sample {
                timestamp: now,
                cpu_percent: 1.0,
                mem_used_mib: 1.0,
            })
            .await;
        buffer
            .push(Sample {
                timestamp: now - chrono::Duration::seconds(5),
                cpu_percent: 2.0,
                mem_used_mib: 2.0,
            })
            .await;

        let samples = buffer.snapshot().await;
        assert_eq!(samples[1].timestamp, now);
        assert!(!buffer.is_empty().await);
    }
}
