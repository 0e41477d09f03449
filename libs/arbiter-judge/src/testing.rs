//! Scripted container runtime for tests.
//!
//! Runs nothing. Each `run` is answered by a responder that sees the files
//! and input the executor materialized, so tests can script verdicts per
//! test case without Docker. Build containers (writable mount) go to a
//! separate build responder that succeeds instantly unless replaced.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::INPUT_FILE;
use crate::error::SandboxError;
use crate::runtime::{ContainerRuntime, ContainerSpec, RunOutcome};

/// What one container was created with
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub image: String,
    pub command: Vec<String>,
    /// Contents of `input.txt`
    pub input: String,
    /// Program files by name, input and build directory excluded
    pub files: HashMap<String, String>,
    /// Set for the build step
    pub writable: bool,
}

/// Scripted answer for one run
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub runtime_ms: u64,
    pub memory_kb: u64,
}

impl ScriptedRun {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            runtime_ms: 10,
            memory_kb: 1024,
            ..Default::default()
        }
    }

    pub fn exit(code: i64, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(code),
            runtime_ms: 10,
            memory_kb: 1024,
            ..Default::default()
        }
    }

    pub fn timeout(runtime_ms: u64) -> Self {
        Self {
            timed_out: true,
            runtime_ms,
            memory_kb: 1024,
            ..Default::default()
        }
    }

    pub fn oom() -> Self {
        Self {
            exit_code: Some(137),
            oom_killed: true,
            runtime_ms: 10,
            memory_kb: 512 * 1024,
            ..Default::default()
        }
    }

    pub fn with_runtime(mut self, runtime_ms: u64) -> Self {
        self.runtime_ms = runtime_ms;
        self
    }

    pub fn with_memory_kb(mut self, memory_kb: u64) -> Self {
        self.memory_kb = memory_kb;
        self
    }
}

type Responder = dyn Fn(&Invocation) -> ScriptedRun + Send + Sync;

#[derive(Default)]
struct State {
    next_id: u64,
    created: HashMap<String, Invocation>,
    memory_kb: HashMap<String, u64>,
    invocations: Vec<Invocation>,
    creates: usize,
    runs: usize,
    builds: usize,
    removes: usize,
    fail_creates: usize,
}

pub struct ScriptedRuntime {
    responder: Box<Responder>,
    build_responder: Box<Responder>,
    state: Mutex<State>,
}

impl ScriptedRuntime {
    /// Answer every run through `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> ScriptedRun + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            build_responder: Box::new(|_| ScriptedRun::ok("")),
            state: Mutex::new(State::default()),
        }
    }

    /// Answer build steps through `responder` instead of succeeding
    pub fn with_build<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Invocation) -> ScriptedRun + Send + Sync + 'static,
    {
        self.build_responder = Box::new(responder);
        self
    }

    /// Answer runs in order; once exhausted every run exits 0 with no output
    pub fn sequence(runs: Vec<ScriptedRun>) -> Self {
        let queue = Mutex::new(VecDeque::from(runs));
        Self::new(move |_| {
            queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| ScriptedRun::ok(""))
        })
    }

    /// Fail the next `count` creates with a runtime error
    pub fn fail_creates(self, count: usize) -> Self {
        self.with_state(|s| s.fail_creates = count);
        self
    }

    pub fn creates(&self) -> usize {
        self.with_state(|s| s.creates)
    }

    /// Program runs, build steps excluded
    pub fn runs(&self) -> usize {
        self.with_state(|s| s.runs)
    }

    pub fn builds(&self) -> usize {
        self.with_state(|s| s.builds)
    }

    pub fn removes(&self) -> usize {
        self.with_state(|s| s.removes)
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> usize {
        self.with_state(|s| s.created.len())
    }

    /// Every container's inputs, in creation order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.with_state(|s| s.invocations.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn read_invocation(spec: &ContainerSpec) -> Result<Invocation, SandboxError> {
    let mut invocation = Invocation {
        image: spec.image.clone(),
        command: spec.command.clone(),
        writable: spec.writable,
        ..Default::default()
    };
    for entry in std::fs::read_dir(&spec.host_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let contents = std::fs::read_to_string(entry.path())?;
        if name == INPUT_FILE {
            invocation.input = contents;
        } else {
            invocation.files.insert(name, contents);
        }
    }
    Ok(invocation)
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let fail = self.with_state(|s| {
            s.creates += 1;
            if s.fail_creates > 0 {
                s.fail_creates -= 1;
                true
            } else {
                false
            }
        });
        if fail {
            return Err(SandboxError::Runtime("scripted create failure".to_string()));
        }

        let invocation = read_invocation(spec)?;
        Ok(self.with_state(|s| {
            s.next_id += 1;
            let id = format!("scripted-{}", s.next_id);
            s.invocations.push(invocation.clone());
            s.created.insert(id.clone(), invocation);
            id
        }))
    }

    async fn run(&self, container_id: &str, _timeout: Duration) -> Result<RunOutcome, SandboxError> {
        let invocation = self
            .with_state(|s| s.created.get(container_id).cloned())
            .ok_or_else(|| SandboxError::Runtime(format!("No such container: {}", container_id)))?;

        let scripted = if invocation.writable {
            self.with_state(|s| s.builds += 1);
            (self.build_responder)(&invocation)
        } else {
            self.with_state(|s| s.runs += 1);
            (self.responder)(&invocation)
        };
        self.with_state(|s| s.memory_kb.insert(container_id.to_string(), scripted.memory_kb));

        Ok(RunOutcome {
            stdout: scripted.stdout,
            stderr: scripted.stderr,
            exit_code: scripted.exit_code,
            timed_out: scripted.timed_out,
            oom_killed: scripted.oom_killed,
            runtime_ms: scripted.runtime_ms,
        })
    }

    async fn inspect_stats(&self, container_id: &str) -> Result<String, SandboxError> {
        let used = self.with_state(|s| s.memory_kb.get(container_id).copied().unwrap_or(0));
        Ok(format!("{}B / {}B", used * 1024, 512 * 1024 * 1024))
    }

    async fn remove(&self, container_id: &str) -> Result<(), SandboxError> {
        self.with_state(|s| {
            s.removes += 1;
            s.created.remove(container_id);
            s.memory_kb.remove(container_id);
        });
        Ok(())
    }
}
