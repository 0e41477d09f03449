// Docker-backed container runtime using Bollard

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerState, HostConfig};
use bollard::Docker;
use chrono::DateTime;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::SANDBOX_DIR;
use crate::error::SandboxError;
use crate::runtime::{ContainerRuntime, ContainerSpec, RunOutcome};

/// Per-stream cap on captured container output
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
/// Scratch space for compilers and runtimes; the mounted program dir is read-only
const TMPFS_OPTIONS: &str = "rw,exec,nosuid,size=268435456";

#[derive(Debug, Clone, Copy, Default)]
struct MemorySample {
    peak_bytes: u64,
    limit_bytes: u64,
}

impl MemorySample {
    fn observe(&mut self, stats: &Stats) {
        let memory = &stats.memory_stats;
        if let Some(used) = memory.max_usage.or(memory.usage) {
            self.peak_bytes = self.peak_bytes.max(used);
        }
        if let Some(limit) = memory.limit {
            self.limit_bytes = limit;
        }
    }

    /// `"<peak>B / <limit>B"` in exact bytes
    fn report(&self) -> String {
        format!("{}B / {}B", self.peak_bytes, self.limit_bytes)
    }
}

fn runtime_error(context: &str, err: BollardError) -> SandboxError {
    SandboxError::Runtime(format!("{}: {}", context, err))
}

/// Wall time between the container's start and finish timestamps
fn state_runtime_ms(state: &ContainerState) -> Option<u64> {
    let started = DateTime::parse_from_rfc3339(state.started_at.as_deref()?).ok()?;
    let finished = DateTime::parse_from_rfc3339(state.finished_at.as_deref()?).ok()?;
    let millis = (finished - started).num_milliseconds();
    (millis > 0).then_some(millis as u64)
}

fn push_capped(buffer: &mut String, chunk: &[u8]) {
    if buffer.len() >= MAX_CAPTURE_BYTES {
        return;
    }
    let text = String::from_utf8_lossy(chunk);
    let room = MAX_CAPTURE_BYTES - buffer.len();
    if text.len() <= room {
        buffer.push_str(&text);
    } else {
        let mut end = room;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        buffer.push_str(&text[..end]);
    }
}

/// Container runtime backed by the local Docker daemon.
///
/// Containers run with networking off, a memory ceiling with swap disabled,
/// a CPU quota, a pids limit, all capabilities dropped, and the program
/// directory bind-mounted read-only (read-write for the build step). Peak memory is sampled from the stats
/// stream while the container runs, since a stopped container reports none.
pub struct DockerRuntime {
    docker: Docker,
    samples: Mutex<HashMap<String, MemorySample>>,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| runtime_error("Failed to connect to Docker daemon", e))?;
        Ok(Self {
            docker,
            samples: Mutex::new(HashMap::new()),
        })
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| runtime_error("Failed to pull image", e))?;
        }
        info!(image, "Image pulled");
        Ok(())
    }

    async fn wait_exit(&self, container_id: &str) -> Result<Option<i64>, SandboxError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut stream = self.docker.wait_container(container_id, options);
        match stream.next().await {
            Some(Ok(response)) => Ok(Some(response.status_code)),
            // Bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(Some(code)),
            Some(Err(e)) => Err(runtime_error("Failed to wait for container", e)),
            None => Ok(None),
        }
    }

    async fn collect_logs(&self, container_id: &str) -> (String, String) {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stream = self.docker.logs(container_id, options);
        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    push_capped(&mut stdout, &message)
                }
                Ok(LogOutput::StdErr { message }) => push_capped(&mut stderr, &message),
                Ok(_) => {}
                Err(e) => {
                    warn!(container = container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }
        (stdout, stderr)
    }

    fn store_sample(&self, container_id: &str, sample: MemorySample) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.insert(container_id.to_string(), sample);
    }

    fn take_sample(&self, container_id: &str) -> Option<MemorySample> {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.remove(container_id)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            pids_limit: Some(spec.pids_limit),
            network_mode: Some("none".to_string()),
            binds: Some(vec![format!(
                "{}:{}:{}",
                spec.host_dir.display(),
                SANDBOX_DIR,
                if spec.writable { "rw" } else { "ro" }
            )]),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                TMPFS_OPTIONS.to_string(),
            )])),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(SANDBOX_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| runtime_error("Failed to create container", e))?;

        debug!(container = %response.id, name = %spec.name, image = %spec.image, "Container created");
        Ok(response.id)
    }

    async fn run(&self, container_id: &str, timeout: Duration) -> Result<RunOutcome, SandboxError> {
        let sample = Arc::new(Mutex::new(MemorySample::default()));
        let sampler = {
            let docker = self.docker.clone();
            let id = container_id.to_string();
            let sample = Arc::clone(&sample);
            tokio::spawn(async move {
                let options = Some(StatsOptions {
                    stream: true,
                    one_shot: false,
                });
                let mut stream = docker.stats(&id, options);
                while let Some(Ok(stats)) = stream.next().await {
                    sample.lock().unwrap_or_else(|e| e.into_inner()).observe(&stats);
                }
            })
        };

        let start_time = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            sampler.abort();
            return Err(runtime_error("Failed to start container", e));
        }

        let waited = tokio::time::timeout(timeout, self.wait_exit(container_id)).await;
        let wall_ms = start_time.elapsed().as_millis() as u64;

        let (exit_code, timed_out) = match waited {
            Ok(code) => (code?, false),
            Err(_) => {
                warn!(container = container_id, timeout_ms = timeout.as_millis() as u64, "Execution timed out, killing container");
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = container_id, error = %e, "Failed to kill timed-out container");
                }
                (None, true)
            }
        };

        sampler.abort();
        let observed = *sample.lock().unwrap_or_else(|e| e.into_inner());
        self.store_sample(container_id, observed);

        let (stdout, stderr) = self.collect_logs(container_id).await;

        let state = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_error("Failed to inspect container", e))?
            .state;

        let oom_killed = state.as_ref().and_then(|s| s.oom_killed).unwrap_or(false);
        let runtime_ms = if timed_out {
            wall_ms
        } else {
            state.as_ref().and_then(state_runtime_ms).unwrap_or(wall_ms)
        };

        Ok(RunOutcome {
            stdout,
            stderr,
            exit_code,
            timed_out,
            oom_killed,
            runtime_ms,
        })
    }

    async fn inspect_stats(&self, container_id: &str) -> Result<String, SandboxError> {
        let mut sample = self.take_sample(container_id).unwrap_or_default();

        if sample.peak_bytes == 0 {
            let options = Some(StatsOptions {
                stream: false,
                one_shot: true,
            });
            let mut stream = self.docker.stats(container_id, options);
            if let Some(stats) = stream.next().await {
                let stats = stats.map_err(|e| runtime_error("Failed to read container stats", e))?;
                sample.observe(&stats);
            }
        }

        Ok(sample.report())
    }

    async fn remove(&self, container_id: &str) -> Result<(), SandboxError> {
        self.take_sample(container_id);
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        self.docker
            .remove_container(container_id, options)
            .await
            .map_err(|e| runtime_error("Failed to remove container", e))
    }
}
