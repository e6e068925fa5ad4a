// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Ecorun

// Sandbox Image
pub const ECORUN_IMAGE: &str = "ECORUN_IMAGE";
pub const ECORUN_BUILD_CONTEXT: &str = "ECORUN_BUILD_CONTEXT";
pub const ECORUN_DOCKERFILE: &str = "ECORUN_DOCKERFILE";

// Sandbox Container
pub const ECORUN_CONTAINER_PREFIX: &str = "ECORUN_CONTAINER_PREFIX";
pub const ECORUN_SANDBOX_USER: &str = "ECORUN_SANDBOX_USER";
pub const ECORUN_MOUNT_PATH: &str = "ECORUN_MOUNT_PATH";
pub const ECORUN_STOP_GRACE_SECS: &str = "ECORUN_STOP_GRACE_SECS";

// Resource Monitoring
pub const ECORUN_STATS_MODE: &str = "ECORUN_STATS_MODE";
pub const ECORUN_POLL_INTERVAL_MS: &str = "ECORUN_POLL_INTERVAL_MS";
pub const ECORUN_TRANSIENT_BACKOFF_MS: &str = "ECORUN_TRANSIENT_BACKOFF_MS";
pub const ECORUN_MONITOR_JOIN_GRACE_SECS: &str = "ECORUN_MONITOR_JOIN_GRACE_SECS";
pub const ECORUN_DOCKER_BIN: &str = "ECORUN_DOCKER_BIN";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
