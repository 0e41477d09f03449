/// Sandbox Executor - runs one program under resource limits
///
/// **Core Responsibility:**
/// Materialize program files in a private working directory, build them
/// once when the language compiles, run each input in a fresh container,
/// and report raw outputs plus measured runtime and peak memory.
///
/// **Boundary:**
/// - Knows HOW to execute, not whether the output is correct
/// - Classifies failures heuristically (compile vs runtime, out-of-memory)
/// - Tears down the container and working directory on every exit path
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbiter_common::config::SandboxConfig;
use arbiter_common::retry::{Backoff, RetryPolicy};
use tracing::{debug, info, warn};

use crate::config::{LanguageConfig, BUILD_DIR, INPUT_FILE};
use crate::error::SandboxError;
use crate::runtime::{ContainerRuntime, ContainerSpec, RunOutcome};

/// Safety limits to prevent pathological inputs from reaching the runtime
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Stderr fragments that indicate the program ran out of memory
const OOM_PATTERNS: &[&str] = &[
    "MemoryError",
    "OutOfMemoryError",
    "std::bad_alloc",
    "memory allocation of",
    "Cannot allocate memory",
    "out of memory",
];

const SIGKILL_EXIT: i64 = 137;
const SIGSEGV_EXIT: i64 = 139;

/// One file placed in the sandbox directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramFile {
    pub name: String,
    pub contents: String,
}

impl ProgramFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Limits for one execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionLimits {
    /// Hard wall-clock deadline
    pub timeout_ms: u64,
    /// Container memory ceiling, not the judged limit
    pub memory_ceiling_kb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    /// Deadline for the build step, separate from the run's
    pub compile_timeout_ms: u64,
}

impl ExecutionLimits {
    pub fn from_config(config: &SandboxConfig, timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            compile_timeout_ms: config.compile_timeout_ms,
            memory_ceiling_kb: config.memory_ceiling_mb * 1024,
            cpus: config.cpus,
            pids_limit: config.pids_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Compile,
    Runtime,
}

/// Raw execution output, consumed by the evaluator
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub runtime_ms: u64,
    pub memory_kb: u64,
    pub timed_out: bool,
    pub oom_killed: bool,
    /// Set for a non-zero exit that did not time out
    pub failure: Option<FailureKind>,
    /// User-facing note when the failure looks memory related
    pub memory_message: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_compile_failure(&self) -> bool {
        self.failure == Some(FailureKind::Compile)
    }

    /// Stderr plus any classification note, for per-test error messages
    pub fn error_text(&self) -> String {
        let mut text = self.stderr.trim_end().to_string();
        if let Some(note) = &self.memory_message {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(note);
        }
        text
    }
}

/// Normalize the "used" side of a `"<used> / <limit>"` report to kilobytes
pub fn parse_memory_usage(report: &str) -> Result<u64, SandboxError> {
    let invalid = || SandboxError::MemoryReport(report.to_string());

    let used = report.split('/').next().ok_or_else(invalid)?.trim();
    let split_at = used
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(invalid)?;
    let (number, unit) = used.split_at(split_at);
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;

    let bytes_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "b" => 1.0,
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };

    if value < 0.0 {
        return Err(invalid());
    }
    Ok((value * bytes_per_unit / 1024.0).ceil() as u64)
}

/// Heuristic compile-vs-runtime classification of a finished run
pub fn classify_failure(language: &LanguageConfig, outcome: &RunOutcome) -> Option<FailureKind> {
    if outcome.timed_out || outcome.exit_code == Some(0) {
        return None;
    }

    let Some(code) = outcome.exit_code else {
        return Some(FailureKind::Runtime);
    };

    let compile_exit = language.compile_failure_exit_code == Some(code);
    let compile_text = language
        .compile_error_patterns
        .iter()
        .any(|pattern| outcome.stderr.contains(pattern.as_str()));

    if compile_exit || compile_text {
        Some(FailureKind::Compile)
    } else {
        Some(FailureKind::Runtime)
    }
}

/// User-facing note for runs that look like they ran out of memory
pub fn memory_message(outcome: &RunOutcome) -> Option<String> {
    if outcome.oom_killed {
        return Some("[Killed: memory limit exceeded]".to_string());
    }
    if OOM_PATTERNS.iter().any(|p| outcome.stderr.contains(p)) {
        return Some("[Out of memory: the program could not allocate more memory]".to_string());
    }
    match outcome.exit_code {
        Some(SIGKILL_EXIT) if !outcome.timed_out => {
            Some("[Container killed: likely out of memory]".to_string())
        }
        _ => None,
    }
}

/// Program files on disk, built if the language has a build step
#[derive(Debug)]
pub struct PreparedProgram {
    workdir: tempfile::TempDir,
}

/// Result of [`SandboxExecutor::prepare`]
#[derive(Debug)]
pub enum Build {
    Ready(PreparedProgram),
    /// Build output, classified as a compile failure
    Failed(ExecutionOutcome),
}

struct ContainerRun {
    outcome: RunOutcome,
    memory_kb: u64,
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution errors out or is cancelled
struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, container_id: String) -> Self {
        Self {
            runtime,
            container_id: Some(container_id),
        }
    }

    /// Remove the container now, awaiting the runtime
    async fn release(mut self) {
        if let Some(id) = self.container_id.take() {
            if let Err(e) = self.runtime.remove(&id).await {
                warn!(container = %id, error = %e, "Failed to remove container");
            }
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Best-effort cleanup - cannot be async in Drop
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        let runtime = Arc::clone(&self.runtime);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&container_id).await {
                        warn!(container = %container_id, error = %e, "Failed to cleanup container");
                    }
                });
            }
            Err(_) => warn!(container = %container_id, "No runtime available to cleanup container"),
        }
    }
}

/// Runs programs in isolated, ephemeral containers
pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    work_root: PathBuf,
    create_retry: RetryPolicy,
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            work_root: work_root.into(),
            create_retry: RetryPolicy::new(
                2,
                Backoff::Exponential {
                    base: Duration::from_millis(250),
                    max: Duration::from_secs(2),
                },
            ),
        }
    }

    pub fn with_create_retry(mut self, policy: RetryPolicy) -> Self {
        self.create_retry = policy;
        self
    }

    /// Materialize program files once and run the language's build step, if any.
    ///
    /// **Guarantees:**
    /// - Oversized source is rejected before any container exists
    /// - The build runs in its own container under `limits.compile_timeout_ms`,
    ///   so its time never reaches a test's runtime
    /// - A failed or timed-out build comes back as a compile-classified outcome
    #[tracing::instrument(skip_all, fields(language = %language.name))]
    pub async fn prepare(
        &self,
        language: &LanguageConfig,
        files: &[ProgramFile],
        limits: &ExecutionLimits,
    ) -> Result<Build, SandboxError> {
        let source_bytes: usize = files.iter().map(|f| f.contents.len()).sum();
        if source_bytes > MAX_SOURCE_CODE_BYTES {
            return Err(SandboxError::InputTooLarge {
                what: "Source code",
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }

        let program = PreparedProgram {
            workdir: self.prepare_workdir(files)?,
        };
        let Some(command) = language.compile_command() else {
            return Ok(Build::Ready(program));
        };

        let ContainerRun { outcome: run, .. } = self
            .execute(language, &program, command, true, limits.compile_timeout_ms, limits)
            .await?;

        if run.exit_code == Some(0) && !run.timed_out {
            info!(compile_ms = run.runtime_ms, "Compilation succeeded");
            return Ok(Build::Ready(program));
        }

        let mut stderr = if run.stderr.trim().is_empty() {
            run.stdout.clone()
        } else {
            run.stderr.clone()
        };
        if run.timed_out {
            stderr.push_str("\n[Compilation timed out]");
        }
        warn!(
            compile_ms = run.runtime_ms,
            error_preview = stderr.lines().next().unwrap_or(""),
            "Compilation failed"
        );

        // Build time and limits are not the program's; only the failure carries over
        Ok(Build::Failed(ExecutionOutcome {
            stdout: run.stdout,
            stderr,
            exit_code: run.exit_code,
            failure: Some(FailureKind::Compile),
            ..Default::default()
        }))
    }

    /// Run a prepared program against one input under `limits`.
    ///
    /// **Guarantees:**
    /// - Oversized input is rejected before any container exists
    /// - Only the program's own run is timed
    /// - The container is removed on every exit path, including errors
    #[tracing::instrument(skip_all, fields(language = %language.name, timeout_ms = limits.timeout_ms))]
    pub async fn run_prepared(
        &self,
        language: &LanguageConfig,
        program: &PreparedProgram,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        if input.len() > MAX_TEST_INPUT_BYTES {
            return Err(SandboxError::InputTooLarge {
                what: "Test input",
                limit: MAX_TEST_INPUT_BYTES,
            });
        }
        write_readable(&program.workdir.path().join(INPUT_FILE), input)?;

        let ContainerRun { outcome: run, memory_kb } = self
            .execute(language, program, language.command(), false, limits.timeout_ms, limits)
            .await?;

        let mut stderr = run.stderr.clone();
        if run.timed_out {
            stderr.push_str("\n[Execution timed out]");
        } else if run.exit_code == Some(SIGSEGV_EXIT) {
            stderr.push_str("\n[Container killed: segmentation fault]");
        }

        let outcome = ExecutionOutcome {
            failure: classify_failure(language, &run),
            memory_message: memory_message(&run),
            stdout: run.stdout,
            stderr,
            exit_code: run.exit_code,
            runtime_ms: run.runtime_ms,
            memory_kb,
            timed_out: run.timed_out,
            oom_killed: run.oom_killed,
        };

        debug!(
            exit_code = ?outcome.exit_code,
            runtime_ms = outcome.runtime_ms,
            memory_kb = outcome.memory_kb,
            timed_out = outcome.timed_out,
            failure = ?outcome.failure,
            "Execution finished"
        );

        Ok(outcome)
    }

    /// Build and run program files against one input.
    ///
    /// A failed build is returned as the outcome, classified as a compile failure.
    pub async fn run(
        &self,
        language: &LanguageConfig,
        files: &[ProgramFile],
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        match self.prepare(language, files, limits).await? {
            Build::Ready(program) => self.run_prepared(language, &program, input, limits).await,
            Build::Failed(outcome) => Ok(outcome),
        }
    }

    /// One container, created, run to completion and removed
    async fn execute(
        &self,
        language: &LanguageConfig,
        program: &PreparedProgram,
        command: Vec<String>,
        writable: bool,
        timeout_ms: u64,
        limits: &ExecutionLimits,
    ) -> Result<ContainerRun, SandboxError> {
        let spec = ContainerSpec {
            name: format!("arbiter-{}", uuid::Uuid::new_v4()),
            image: language.image.clone(),
            command,
            env: language.env.clone(),
            host_dir: program.workdir.path().to_path_buf(),
            writable,
            memory_bytes: (limits.memory_ceiling_kb * 1024) as i64,
            nano_cpus: (limits.cpus * 1_000_000_000.0) as i64,
            pids_limit: limits.pids_limit,
        };

        let container_id = self
            .create_retry
            .run(
                "container_create",
                || self.runtime.create(&spec),
                |e| matches!(e, SandboxError::Runtime(_)),
            )
            .await?;

        // Set up the cleanup guard immediately after creation
        let guard = ContainerGuard::new(Arc::clone(&self.runtime), container_id.clone());

        let outcome = self
            .runtime
            .run(&container_id, Duration::from_millis(timeout_ms))
            .await?;

        let memory_kb = match self.runtime.inspect_stats(&container_id).await {
            Ok(report) => parse_memory_usage(&report).unwrap_or_else(|e| {
                warn!(container = %container_id, error = %e, "Ignoring memory report");
                0
            }),
            Err(e) => {
                warn!(container = %container_id, error = %e, "Memory stats unavailable");
                0
            }
        };

        guard.release().await;
        Ok(ContainerRun { outcome, memory_kb })
    }

    fn prepare_workdir(&self, files: &[ProgramFile]) -> Result<tempfile::TempDir, SandboxError> {
        std::fs::create_dir_all(&self.work_root)?;
        let workdir = tempfile::Builder::new()
            .prefix("arbiter-")
            .tempdir_in(&self.work_root)?;

        for file in files {
            write_readable(&workdir.path().join(&file.name), &file.contents)?;
        }
        let build_dir = workdir.path().join(BUILD_DIR);
        std::fs::create_dir(&build_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(workdir.path(), std::fs::Permissions::from_mode(0o755))?;
            // The build container's user differs from ours and has no capabilities
            std::fs::set_permissions(&build_dir, std::fs::Permissions::from_mode(0o777))?;
        }

        Ok(workdir)
    }
}

/// Write a file the unprivileged sandbox user can read
fn write_readable(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageRegistry;

    fn python() -> LanguageConfig {
        LanguageRegistry::builtin().unwrap().get("python").unwrap().clone()
    }

    fn exited(code: i64, stderr: &str) -> RunOutcome {
        RunOutcome {
            stderr: stderr.to_string(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_memory_usage_units() {
        assert_eq!(parse_memory_usage("2048B / 1GiB").unwrap(), 2);
        assert_eq!(parse_memory_usage("1500B / 1GiB").unwrap(), 2);
        assert_eq!(parse_memory_usage("12KiB / 1GiB").unwrap(), 12);
        assert_eq!(parse_memory_usage("12kB / 1GB").unwrap(), 12);
        assert_eq!(parse_memory_usage("1.5MiB / 512MiB").unwrap(), 1536);
        assert_eq!(parse_memory_usage("3MB / 512MB").unwrap(), 3072);
        assert_eq!(parse_memory_usage("1GiB / 2GiB").unwrap(), 1024 * 1024);
        assert_eq!(parse_memory_usage("0B / 0B").unwrap(), 0);
        assert_eq!(parse_memory_usage("67108864B / 536870912B").unwrap(), 65536);
        assert_eq!(parse_memory_usage("67108865B / 536870912B").unwrap(), 65537);
    }

    #[test]
    fn test_parse_memory_usage_rejects_garbage() {
        assert!(parse_memory_usage("").is_err());
        assert!(parse_memory_usage("12 / 100").is_err());
        assert!(parse_memory_usage("abcMiB / 1GiB").is_err());
        assert!(parse_memory_usage("12PiB / 1GiB").is_err());
    }

    #[test]
    fn test_classify_success_and_timeout() {
        let lang = python();
        assert_eq!(classify_failure(&lang, &exited(0, "warning")), None);

        let timed_out = RunOutcome {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(classify_failure(&lang, &timed_out), None);
    }

    #[test]
    fn test_classify_compile_vs_runtime() {
        let lang = python();
        assert_eq!(
            classify_failure(&lang, &exited(1, "  File \"main.py\", line 1\nSyntaxError: invalid syntax")),
            Some(FailureKind::Compile)
        );
        assert_eq!(
            classify_failure(&lang, &exited(1, "ZeroDivisionError: division by zero")),
            Some(FailureKind::Runtime)
        );
    }

    #[test]
    fn test_classify_compile_exit_code_convention() {
        let mut lang = python();
        lang.compile_error_patterns.clear();
        lang.compile_failure_exit_code = Some(3);
        assert_eq!(classify_failure(&lang, &exited(3, "")), Some(FailureKind::Compile));
        assert_eq!(classify_failure(&lang, &exited(2, "")), Some(FailureKind::Runtime));
    }

    #[test]
    fn test_memory_message() {
        assert!(memory_message(&exited(1, "MemoryError")).is_some());
        assert!(memory_message(&exited(134, "terminate called after throwing an instance of 'std::bad_alloc'")).is_some());
        assert!(memory_message(&exited(137, "")).is_some());
        assert!(memory_message(&exited(1, "IndexError")).is_none());

        let oom = RunOutcome {
            oom_killed: true,
            exit_code: Some(137),
            ..Default::default()
        };
        assert_eq!(memory_message(&oom).unwrap(), "[Killed: memory limit exceeded]");
    }

    #[test]
    fn test_error_text_appends_memory_note() {
        let outcome = ExecutionOutcome {
            stderr: "Traceback\n".to_string(),
            memory_message: Some("[note]".to_string()),
            ..Default::default()
        };
        assert_eq!(outcome.error_text(), "Traceback\n[note]");
    }
}
