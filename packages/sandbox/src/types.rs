// ABOUTME: Core type definitions for sandboxed execution
// ABOUTME: Defines the execution request, samples, summaries, exit status and the final result

use crate::error::{RequestError, SandboxError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Interpreter used when a job does not name one
pub const DEFAULT_INTERPRETER: &str = "python";

/// Wait timeout used when a job does not set one
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60;

/// CPU and memory caps applied to the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU quota in microseconds per period
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,
    /// CPU scheduling period in microseconds
    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,
    /// Memory limit in megabytes; swap is capped at the same value
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

fn default_cpu_quota() -> i64 {
    50_000
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_memory_mb() -> u64 {
    256
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota: default_cpu_quota(),
            cpu_period: default_cpu_period(),
            memory_mb: default_memory_mb(),
        }
    }
}

impl ResourceLimits {
    /// Fraction of a core granted to the sandbox (quota / period)
    pub fn allocated_cores(&self) -> f64 {
        if self.cpu_period > 0 {
            self.cpu_quota as f64 / self.cpu_period as f64
        } else {
            0.0
        }
    }

    /// Memory cap in bytes, `None` when it does not fit the engine's signed field
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| i64::try_from(bytes).ok())
    }
}

/// Coefficients of the linear power model
///
/// The all-zero default stands in when a job could not be loaded at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerCoefficients {
    #[serde(alias = "cpu_per_core_watt")]
    pub cpu_watts_per_core: f64,
    #[serde(alias = "ram_per_gb_watt")]
    pub ram_watts_per_gb: f64,
    #[serde(alias = "baseline_container_watt")]
    pub baseline_watts: f64,
    /// Free-form description of where the figures come from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PowerCoefficients {
    pub fn new(cpu_watts_per_core: f64, ram_watts_per_gb: f64, baseline_watts: f64) -> Self {
        Self {
            cpu_watts_per_core,
            ram_watts_per_gb,
            baseline_watts,
            notes: None,
        }
    }
}

/// A job to run inside a fresh sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Host directory holding the user's code, mounted read-only
    #[serde(alias = "user_code_dir", alias = "user_code_dir_relative")]
    pub code_dir: PathBuf,
    /// Script path relative to the code directory
    #[serde(alias = "code_entrypoint")]
    pub entrypoint: String,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default = "default_wait_timeout", alias = "container_wait_timeout")]
    pub wait_timeout_secs: u64,
    #[serde(alias = "power_assumptions")]
    pub power_model: PowerCoefficients,
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_SECS
}

impl ExecutionRequest {
    pub fn new(
        code_dir: impl Into<PathBuf>,
        entrypoint: impl Into<String>,
        power_model: PowerCoefficients,
    ) -> Self {
        Self {
            code_dir: code_dir.into(),
            entrypoint: entrypoint.into(),
            interpreter: default_interpreter(),
            limits: ResourceLimits::default(),
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            power_model,
        }
    }

    /// Load a job description from a JSON file
    ///
    /// A relative `code_dir` is resolved against the directory containing the file.
    pub fn from_json_file(path: &Path) -> Result<Self, RequestError> {
        let content = std::fs::read_to_string(path).map_err(|source| RequestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut request: Self =
            serde_json::from_str(&content).map_err(|source| RequestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if request.code_dir.is_relative() {
            if let Some(base) = path.parent() {
                request.code_dir = base.join(&request.code_dir);
            }
        }

        Ok(request)
    }

    /// Structural checks performed before any sandbox is started
    pub fn validate(&self) -> Result<(), RequestError> {
        let entrypoint = self.entrypoint.trim();
        if entrypoint.is_empty() {
            return Err(RequestError::invalid("entrypoint", "must not be empty"));
        }
        if Path::new(entrypoint).is_absolute() {
            return Err(RequestError::invalid(
                "entrypoint",
                "must be relative to the code directory",
            ));
        }
        if self.interpreter.trim().is_empty() {
            return Err(RequestError::invalid("interpreter", "must not be empty"));
        }
        if self.limits.cpu_quota <= 0 {
            return Err(RequestError::invalid("cpu_quota", "must be positive"));
        }
        if self.limits.cpu_period <= 0 {
            return Err(RequestError::invalid("cpu_period", "must be positive"));
        }
        if self.limits.memory_mb == 0 {
            return Err(RequestError::invalid("memory_mb", "must be positive"));
        }
        if self.limits.memory_bytes().is_none() {
            return Err(RequestError::invalid(
                "memory_mb",
                format!("{} MiB exceeds the largest supported memory limit", self.limits.memory_mb),
            ));
        }
        if self.wait_timeout_secs == 0 {
            return Err(RequestError::invalid("wait_timeout_secs", "must be positive"));
        }

        let coefficients = [
            ("cpu_watts_per_core", self.power_model.cpu_watts_per_core),
            ("ram_watts_per_gb", self.power_model.ram_watts_per_gb),
            ("baseline_watts", self.power_model.baseline_watts),
        ];
        for (field, value) in coefficients {
            if !value.is_finite() || value < 0.0 {
                return Err(RequestError::invalid(
                    field,
                    format!("must be a non-negative number, got {}", value),
                ));
            }
        }

        Ok(())
    }

    /// Command run inside the sandbox: `[interpreter, entrypoint]`
    pub fn command(&self) -> Vec<String> {
        vec![self.interpreter.clone(), self.entrypoint.trim().to_string()]
    }
}

/// One observation of a running sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub mem_used_mib: f64,
}

impl Sample {
    /// A sample is usable when both readings are finite and non-negative
    pub fn is_valid(&self) -> bool {
        self.cpu_percent.is_finite()
            && self.cpu_percent >= 0.0
            && self.mem_used_mib.is_finite()
            && self.mem_used_mib >= 0.0
    }
}

/// Averages and peaks over the valid samples of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Every sample the monitor recorded, valid or not
    pub samples_collected: usize,
    pub samples_skipped: usize,
    pub avg_cpu_percent: f64,
    pub avg_mem_mib: f64,
    pub peak_mem_mib: f64,
}

/// Output of the power model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEstimate {
    pub allocated_cores: f64,
    pub avg_cpu_power_watt: f64,
    pub avg_ram_power_watt: f64,
    pub avg_power_watt: f64,
    pub energy_kwh: f64,
}

/// How the sandboxed program ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The sandbox was never started
    NotRun,
    /// The program exited with this status code
    Exited(i64),
    /// The wait timeout elapsed first
    TimedOut,
    /// The wait call failed
    WaitFailed(String),
}

impl ExitStatus {
    pub const NOT_RUN_CODE: i64 = -1;
    pub const WAIT_ENDED_CODE: i64 = -99;

    /// Integer encoding used at the external boundary
    pub fn code(&self) -> i64 {
        match self {
            Self::NotRun => Self::NOT_RUN_CODE,
            Self::Exited(code) => *code,
            Self::TimedOut | Self::WaitFailed(_) => Self::WAIT_ENDED_CODE,
        }
    }
}

impl Serialize for ExitStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

/// The single value returned for every execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    #[serde(rename = "exit_code")]
    pub exit_status: ExitStatus,
    pub logs: String,
    pub runtime_seconds: f64,
    pub resources: Option<ResourceSummary>,
    pub power: Option<PowerEstimate>,
    pub power_model: PowerCoefficients,
    pub raw_samples: Vec<Sample>,
    pub diagnostics: Vec<String>,
    /// Set when the stats source became unusable during the run
    pub monitor_degraded: bool,
    pub sandbox_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// An empty result that has not run yet
    pub fn pending(power_model: PowerCoefficients) -> Self {
        Self {
            success: false,
            error: None,
            exit_status: ExitStatus::NotRun,
            logs: String::new(),
            runtime_seconds: 0.0,
            resources: None,
            power: None,
            power_model,
            raw_samples: Vec::new(),
            diagnostics: Vec::new(),
            monitor_degraded: false,
            sandbox_name: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Result for a run that failed before any sandbox was started
    pub fn failed(power_model: PowerCoefficients, error: &SandboxError) -> Self {
        let message = error.to_string();
        let mut result = Self::pending(power_model);
        result.diagnostics.push(message.clone());
        result.error = Some(message);
        result
    }

    pub fn exit_code(&self) -> i64 {
        self.exit_status.code()
    }
}
