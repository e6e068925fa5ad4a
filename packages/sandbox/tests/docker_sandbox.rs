// ABOUTME: Integration tests running real sandboxes against a local Docker daemon
// ABOUTME: Ignored by default; run with `cargo test -- --ignored` when Docker is available

use ecorun_sandbox::{
    stats, ContainerOrchestrator, DockerEngine, ExecutionRequest, PowerCoefficients,
    RunnerSettings, SandboxEngine, SandboxError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn settings() -> RunnerSettings {
    RunnerSettings {
        build_context: PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../docker")
            .display()
            .to_string(),
        ..RunnerSettings::from_env()
    }
}

fn script_dir(script: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("main.py"), script).expect("Failed to write script");
    dir
}

async fn orchestrator() -> Option<(ContainerOrchestrator, Arc<DockerEngine>)> {
    let engine = match DockerEngine::connect().await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            println!("Skipping test: {}", e);
            return None;
        }
    };
    let settings = settings();
    let stats = stats::from_settings(&settings, engine.client());
    Some((
        ContainerOrchestrator::new(engine.clone(), stats, settings),
        engine,
    ))
}

/// A short CPU-bound script runs to completion and is measured
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_real_execution_produces_estimate() {
    let Some((orchestrator, engine)) = orchestrator().await else {
        return;
    };
    let dir = script_dir(
        "import time\nend = time.time() + 3\nwhile time.time() < end:\n    pass\nprint('done')\n",
    );
    let request = ExecutionRequest::new(dir.path(), "main.py", PowerCoefficients::new(10.0, 0.5, 1.0));

    let result = orchestrator.execute(&request).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.exit_code(), 0);
    assert!(result.logs.contains("done"));
    assert!(result.resources.unwrap().samples_collected >= 1);

    let name = result.sandbox_name.unwrap();
    let leftovers = engine.list_sandboxes().await.unwrap();
    assert!(leftovers.iter().all(|s| s.name != name));
}

/// A script that sleeps past the timeout is stopped and reported with -99
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_real_timeout_is_enforced() {
    let Some((orchestrator, engine)) = orchestrator().await else {
        return;
    };
    let dir = script_dir("import time\ntime.sleep(120)\n");
    let mut request =
        ExecutionRequest::new(dir.path(), "main.py", PowerCoefficients::new(10.0, 0.5, 1.0));
    request.wait_timeout_secs = 3;

    let result = orchestrator.execute(&request).await;

    assert_eq!(result.exit_code(), -99);
    assert!(result.runtime_seconds < 10.0);

    let name = result.sandbox_name.unwrap();
    let leftovers = engine.list_sandboxes().await.unwrap();
    assert!(leftovers.iter().all(|s| s.name != name));
}

/// The sandbox has no network access
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_real_sandbox_has_no_network() {
    let Some((orchestrator, _engine)) = orchestrator().await else {
        return;
    };
    let dir = script_dir(
        "import socket\ntry:\n    socket.create_connection(('1.1.1.1', 53), timeout=2)\n    print('online')\nexcept OSError:\n    print('offline')\n",
    );
    let request = ExecutionRequest::new(dir.path(), "main.py", PowerCoefficients::new(1.0, 1.0, 1.0));

    let result = orchestrator.execute(&request).await;

    assert!(result.logs.contains("offline"), "logs: {}", result.logs);
}

/// Waiting on a container that does not exist reports NotFound
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_wait_on_missing_sandbox() {
    let Ok(engine) = DockerEngine::connect().await else {
        return;
    };
    let handle = ecorun_sandbox::SandboxHandle {
        id: "ecorun-sandbox-does-not-exist".to_string(),
        name: "ecorun-sandbox-does-not-exist".to_string(),
    };

    let result = engine
        .wait(&handle, std::time::Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(SandboxError::NotFound(_))));
    assert!(engine.remove(&handle).await.is_ok());
}
