// ABOUTME: Orchestrates one sandboxed execution from image check to cleanup
// ABOUTME: Drives the engine and resource monitor through a fixed lifecycle and assembles the result

use crate::aggregate::summarize;
use crate::engine::{SandboxEngine, SandboxHandle, SandboxSpec};
use crate::error::{RequestError, Result, SandboxError};
use crate::monitor::{MonitorExit, ResourceMonitor, SampleBuffer};
use crate::power::PowerModel;
use crate::settings::RunnerSettings;
use crate::stats::StatsSource;
use crate::types::{ExecutionRequest, ExecutionResult, ExitStatus};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Placeholder stored as logs when the sandbox vanished before they were read
pub const LOGS_NOT_FOUND: &str = "[Error: Sandbox not found during log retrieval]";

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Pending,
    Created,
    Running,
    Completed,
    TimedOut,
    WaitErrored,
    Stopping,
    Removed,
    Done,
}

/// Recoverable problems collected during a run
///
/// The first error recorded becomes the result's error. Only `fail` marks
/// the run as failed; `record_error` fills the error field without doing so.
#[derive(Debug, Default)]
pub struct Diagnostics {
    notes: Vec<String>,
    error: Option<String>,
    failed: bool,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.notes.push(message);
    }

    /// Record an error that makes the run unsuccessful
    pub fn fail(&mut self, message: impl Into<String>) {
        self.failed = true;
        self.record_error(message);
    }

    /// Record an error without affecting success
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        if self.error.is_none() {
            self.error = Some(message.clone());
        }
        self.notes.push(message);
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// State owned by a single execution
struct ExecutionContext {
    sandbox_name: String,
    cancel: CancellationToken,
    buffer: SampleBuffer,
    diagnostics: Diagnostics,
    phase: ExecutionPhase,
    /// Taken just before the sandbox is started; runtime is measured from here
    launched_at: Option<Instant>,
    result: ExecutionResult,
}

impl ExecutionContext {
    fn new(prefix: &str, request: &ExecutionRequest) -> Self {
        let sandbox_name = format!("{}{}", prefix, uuid::Uuid::new_v4());
        let mut result = ExecutionResult::pending(request.power_model.clone());
        result.sandbox_name = Some(sandbox_name.clone());

        Self {
            sandbox_name,
            cancel: CancellationToken::new(),
            buffer: SampleBuffer::new(),
            diagnostics: Diagnostics::default(),
            phase: ExecutionPhase::Pending,
            launched_at: None,
            result,
        }
    }

    fn advance(&mut self, next: ExecutionPhase) {
        debug!(sandbox = %self.sandbox_name, "Phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn finish(mut self) -> ExecutionResult {
        self.advance(ExecutionPhase::Done);
        self.result.finished_at = Some(Utc::now());
        self.result.error = self.diagnostics.error.take();
        self.result.diagnostics = std::mem::take(&mut self.diagnostics.notes);
        self.result.success = self.result.power.is_some() && !self.diagnostics.failed;

        info!(
            sandbox = %self.sandbox_name,
            success = self.result.success,
            exit_code = self.result.exit_code(),
            runtime_seconds = self.result.runtime_seconds,
            "Execution finished"
        );
        self.result
    }
}

/// Runs execution requests in fresh sandboxes
pub struct ContainerOrchestrator {
    engine: Arc<dyn SandboxEngine>,
    stats: Arc<dyn StatsSource>,
    settings: RunnerSettings,
}

impl ContainerOrchestrator {
    pub fn new(
        engine: Arc<dyn SandboxEngine>,
        stats: Arc<dyn StatsSource>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            engine,
            stats,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `request` to completion; always returns a result and never leaves the sandbox behind
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let mut ctx = ExecutionContext::new(&self.settings.container_prefix, request);
        info!(sandbox = %ctx.sandbox_name, entrypoint = %request.entrypoint, "Starting execution");

        let handle = match self.launch(&mut ctx, request).await {
            Ok(handle) => handle,
            Err(e) => {
                ctx.diagnostics.fail(e.to_string());
                return ctx.finish();
            }
        };

        let supervised = AssertUnwindSafe(self.supervise(&mut ctx, &handle, request))
            .catch_unwind()
            .await;

        if let Err(panic) = supervised {
            ctx.cancel.cancel();
            ctx.diagnostics.fail(format!(
                "An unexpected error occurred during run: {}",
                panic_message(panic.as_ref())
            ));
        }

        self.cleanup(&mut ctx, &handle).await;
        ctx.finish()
    }

    /// Validate, ensure the image and start the sandbox
    async fn launch(
        &self,
        ctx: &mut ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<SandboxHandle> {
        request.validate()?;
        let code_dir = resolve_code_dir(request)?;

        self.engine.ensure_image(&self.settings.image_spec()).await?;

        let spec = SandboxSpec::for_request(
            &ctx.sandbox_name,
            &self.settings.image,
            &self.settings.mount_path,
            &self.settings.sandbox_user,
            &code_dir,
            request,
        );
        ctx.advance(ExecutionPhase::Created);

        ctx.launched_at = Some(Instant::now());
        let handle = self.engine.run(&spec).await?;
        ctx.result.started_at = Some(Utc::now());
        ctx.advance(ExecutionPhase::Running);
        Ok(handle)
    }

    async fn supervise(
        &self,
        ctx: &mut ExecutionContext,
        handle: &SandboxHandle,
        request: &ExecutionRequest,
    ) {
        let monitor = ResourceMonitor::new(self.stats.clone(), ctx.buffer.clone(), ctx.cancel.clone())
            .with_backoff(self.settings.transient_backoff)
            .spawn(handle.clone());

        let timeout = Duration::from_secs(request.wait_timeout_secs);
        let clock = ctx.launched_at.unwrap_or_else(Instant::now);
        let status = match self.engine.wait(handle, timeout).await {
            Ok(code) => {
                ctx.advance(ExecutionPhase::Completed);
                ExitStatus::Exited(code)
            }
            Err(SandboxError::Timeout { seconds }) => {
                ctx.advance(ExecutionPhase::TimedOut);
                ctx.diagnostics
                    .warn(format!("Sandbox did not exit within {} seconds", seconds));
                ExitStatus::TimedOut
            }
            Err(e) => {
                ctx.advance(ExecutionPhase::WaitErrored);
                ctx.diagnostics.warn(format!("Error waiting for sandbox: {}", e));
                ExitStatus::WaitFailed(e.to_string())
            }
        };
        let runtime = clock.elapsed().as_secs_f64();

        if !matches!(status, ExitStatus::Exited(_)) {
            self.stop_if_running(ctx, handle).await;
        }
        ctx.result.exit_status = status;
        ctx.result.runtime_seconds = runtime;

        ctx.advance(ExecutionPhase::Stopping);
        ctx.cancel.cancel();
        self.join_monitor(ctx, monitor).await;

        ctx.result.logs = match self.engine.logs(handle).await {
            Ok(logs) => logs,
            Err(SandboxError::NotFound(_)) => {
                ctx.diagnostics
                    .warn("Sandbox not found during log retrieval".to_string());
                LOGS_NOT_FOUND.to_string()
            }
            Err(e) => {
                ctx.diagnostics.warn(format!("Error retrieving logs: {}", e));
                format!("[Error retrieving logs: {}]", e)
            }
        };

        let samples = ctx.buffer.snapshot().await;
        let model = PowerModel::new(request.power_model.clone(), &request.limits);
        let estimate = summarize(&samples).and_then(|summary| {
            let estimate = model.estimate_run(&summary, runtime);
            ctx.result.resources = Some(summary);
            estimate
        });

        match estimate {
            Ok(power) => ctx.result.power = Some(power),
            Err(e) => ctx.diagnostics.fail(e.to_string()),
        }
        ctx.result.raw_samples = samples;
    }

    /// Best-effort stop after a timeout or failed wait
    async fn stop_if_running(&self, ctx: &mut ExecutionContext, handle: &SandboxHandle) {
        match self.engine.is_running(handle).await {
            Ok(true) => {
                info!(sandbox = %handle.name, "Stopping sandbox still running after wait");
                if let Err(e) = self.engine.stop(handle, self.settings.stop_grace).await {
                    ctx.diagnostics
                        .warn(format!("Error stopping sandbox after wait failure: {}", e));
                }
            }
            Ok(false) => debug!(sandbox = %handle.name, "Sandbox already stopped"),
            Err(e) => ctx
                .diagnostics
                .warn(format!("Error checking sandbox status after wait failure: {}", e)),
        }
    }

    async fn join_monitor(
        &self,
        ctx: &mut ExecutionContext,
        monitor: tokio::task::JoinHandle<MonitorExit>,
    ) {
        let grace = self.settings.monitor_join_grace;
        match tokio::time::timeout(grace, monitor).await {
            Ok(Ok(MonitorExit::SourceUnavailable(reason))) => {
                ctx.result.monitor_degraded = true;
                ctx.diagnostics
                    .warn(format!("Resource monitor stopped early: {}", reason));
            }
            Ok(Ok(exit)) => debug!(sandbox = %ctx.sandbox_name, "Monitor exited: {:?}", exit),
            Ok(Err(e)) => {
                ctx.result.monitor_degraded = true;
                ctx.diagnostics
                    .warn(format!("Resource monitor task failed: {}", e));
            }
            Err(_) => ctx.diagnostics.warn(format!(
                "Resource monitor did not stop within {:?}; using samples collected so far",
                grace
            )),
        }
    }

    /// Stop if running, then remove; runs whatever happened before
    async fn cleanup(&self, ctx: &mut ExecutionContext, handle: &SandboxHandle) {
        let mut failure: Option<SandboxError> = None;

        match self.engine.is_running(handle).await {
            Ok(true) => {
                if let Err(e) = self.engine.stop(handle, self.settings.stop_grace).await {
                    warn!(sandbox = %handle.name, "Failed to stop sandbox during cleanup: {}", e);
                    failure.get_or_insert(e);
                }
            }
            Ok(false) => {}
            Err(SandboxError::NotFound(_)) => {
                debug!(sandbox = %handle.name, "Sandbox already removed");
                ctx.advance(ExecutionPhase::Removed);
                return;
            }
            Err(e) => {
                warn!(sandbox = %handle.name, "Failed to inspect sandbox during cleanup: {}", e);
                failure.get_or_insert(e);
            }
        }

        if let Err(e) = self.engine.remove(handle).await {
            failure.get_or_insert(e);
        }

        if let Some(e) = failure {
            ctx.diagnostics
                .record_error(format!("Error during sandbox cleanup: {}", e));
        }
        ctx.advance(ExecutionPhase::Removed);
    }
}

fn resolve_code_dir(request: &ExecutionRequest) -> std::result::Result<PathBuf, RequestError> {
    let code_dir = request
        .code_dir
        .canonicalize()
        .map_err(|_| RequestError::CodeDirectoryNotFound(request.code_dir.clone()))?;

    if !code_dir.is_dir() {
        return Err(RequestError::CodeDirectoryNotFound(request.code_dir.clone()));
    }
    Ok(code_dir)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
