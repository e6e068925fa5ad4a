// ABOUTME: `ecorun run` command executing one job description
// ABOUTME: Loads the job, connects to Docker, runs the orchestrator and prints the JSON result

use anyhow::{Context, Result};
use colored::*;
use ecorun_sandbox::{
    stats, ContainerOrchestrator, DockerEngine, ExecutionRequest, ExecutionResult,
    PowerCoefficients, RunnerSettings, SandboxError, StatsMode,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Returns whether the execution succeeded
pub async fn run_command(job: &Path, stats_mode: Option<StatsMode>, compact: bool) -> Result<bool> {
    let request = match load_request(job) {
        Ok(request) => request,
        Err(result) => {
            print_result(&result, compact)?;
            report(&result);
            return Ok(false);
        }
    };

    let mut settings = RunnerSettings::from_env();
    if let Some(mode) = stats_mode {
        settings.stats_mode = mode;
    }
    info!(job = %job.display(), stats = %settings.stats_mode, "Loaded job description");

    let result = match DockerEngine::connect().await {
        Ok(engine) => {
            let engine = Arc::new(engine);
            let stats = stats::from_settings(&settings, engine.client());
            ContainerOrchestrator::new(engine, stats, settings)
                .execute(&request)
                .await
        }
        Err(e) => ExecutionResult::failed(request.power_model.clone(), &e),
    };

    print_result(&result, compact)?;
    report(&result);
    Ok(result.success)
}

/// A job that cannot be loaded still yields a failed result
fn load_request(job: &Path) -> std::result::Result<ExecutionRequest, ExecutionResult> {
    ExecutionRequest::from_json_file(job).map_err(|e| {
        warn!(job = %job.display(), "Failed to load job description: {}", e);
        ExecutionResult::failed(PowerCoefficients::default(), &SandboxError::from(e))
    })
}

fn print_result(result: &ExecutionResult, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(result)
    } else {
        serde_json::to_string_pretty(result)
    }
    .context("Failed to serialize execution result")?;

    println!("{}", json);
    Ok(())
}

fn report(result: &ExecutionResult) {
    match (&result.power, &result.error) {
        (Some(power), _) if result.success => eprintln!(
            "{} exit code {} in {:.2}s, {:.3} W average, {:.3e} kWh",
            "Done:".green().bold(),
            result.exit_code(),
            result.runtime_seconds,
            power.avg_power_watt,
            power.energy_kwh
        ),
        (_, Some(error)) => eprintln!("{} {}", "Run failed:".red().bold(), error),
        (_, None) => eprintln!("{} no estimate produced", "Run failed:".red().bold()),
    }
}
