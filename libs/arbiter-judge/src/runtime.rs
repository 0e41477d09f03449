//! Container runtime seam used by the sandbox executor.
//!
//! The executor only needs four capabilities from an isolation backend:
//! create an isolated instance, run it to completion under a deadline,
//! report its memory accounting, and tear it down.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;

/// Everything needed to create one isolated execution instance
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    /// Host directory mounted at the sandbox path
    pub host_dir: PathBuf,
    /// Mount the directory read-write; only the build step gets this
    pub writable: bool,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

/// Raw result of running a container to completion or to its deadline
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never reported an exit status (killed on timeout)
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub runtime_ms: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a stopped instance, returning its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Start the instance and wait for exit, killing it once `timeout` elapses
    async fn run(&self, container_id: &str, timeout: Duration) -> Result<RunOutcome, SandboxError>;

    /// Memory accounting as `"<used> / <limit>"`, e.g. `"13107200B / 536870912B"`
    async fn inspect_stats(&self, container_id: &str) -> Result<String, SandboxError>;

    async fn remove(&self, container_id: &str) -> Result<(), SandboxError>;
}
