// ABOUTME: `ecorun prune` command removing leftover sandboxes
// ABOUTME: Stops and removes every container carrying the ecorun management label

use anyhow::{Context, Result};
use colored::*;
use ecorun_sandbox::{DockerEngine, RunnerSettings, SandboxEngine, SandboxHandle};
use tracing::warn;

pub async fn prune_command() -> Result<usize> {
    let settings = RunnerSettings::from_env();
    let engine = DockerEngine::connect()
        .await
        .context("Cannot prune sandboxes without Docker")?;

    let sandboxes = engine
        .list_sandboxes()
        .await
        .context("Failed to list sandboxes")?;

    if sandboxes.is_empty() {
        println!("{}", "No leftover sandboxes".green());
        return Ok(0);
    }

    let mut removed = 0;
    for sandbox in sandboxes {
        let handle = SandboxHandle {
            id: sandbox.id.clone(),
            name: sandbox.name.clone(),
        };

        if sandbox.state == "running" {
            if let Err(e) = engine.stop(&handle, settings.stop_grace).await {
                warn!(sandbox = %handle.name, "Failed to stop sandbox: {}", e);
            }
        }

        match engine.remove(&handle).await {
            Ok(()) => {
                println!("   {} {}", "Removed".green(), handle.name);
                removed += 1;
            }
            Err(e) => println!("   {} {}: {}", "Failed".red(), handle.name, e),
        }
    }

    println!("{} {} sandbox(es)", "Pruned".green().bold(), removed);
    Ok(removed)
}
