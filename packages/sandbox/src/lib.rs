// ABOUTME: Sandboxed execution of untrusted programs with resource monitoring
// ABOUTME: Runs code in locked-down Docker containers and estimates the energy it used

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod power;
pub mod settings;
pub mod stats;
pub mod types;

pub use engine::{
    DockerEngine, ImageSpec, SandboxEngine, SandboxHandle, SandboxInfo, SandboxSpec,
    EXECUTION_LABEL, MANAGED_LABEL,
};
pub use error::{RequestError, Result, SandboxError, StatsError, StatsSourceError};
pub use monitor::{MonitorExit, ResourceMonitor, SampleBuffer};
pub use orchestrator::{ContainerOrchestrator, Diagnostics, ExecutionPhase};
pub use power::PowerModel;
pub use settings::{RunnerSettings, StatsMode};
pub use stats::{DockerCliStats, DockerStatsStream, Reading, StatsPoll, StatsSource};
pub use types::{
    ExecutionRequest, ExecutionResult, ExitStatus, PowerCoefficients, PowerEstimate,
    ResourceLimits, ResourceSummary, Sample,
};
