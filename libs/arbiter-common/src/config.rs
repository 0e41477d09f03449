// Process configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Error)]
#[error("Invalid value '{value}' for {key}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub poll_timeout_secs: u64,
    pub visibility_timeout_secs: u64,
    /// Deliveries allowed before a message is dead-lettered
    pub max_receives: u32,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub work_root: PathBuf,
    /// Container memory ceiling, independent of per-test limits
    pub memory_ceiling_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    /// Extra wall time granted on top of a test's time limit before the hard kill
    pub timeout_grace_ms: u64,
    /// Wall-clock deadline for the one build step of a compiled language
    pub compile_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ScratchConfig {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub redis_url: String,
    pub languages_path: PathBuf,
    pub api_addr: String,
    pub queue: QueueConfig,
    pub sandbox: SandboxConfig,
    pub scratch: ScratchConfig,
    pub lookup_retries: u32,
    pub lookup_backoff_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            languages_path: PathBuf::from("config/languages.json"),
            api_addr: "0.0.0.0:3000".to_string(),
            queue: QueueConfig {
                name: "arbiter:queue:judge".to_string(),
                poll_timeout_secs: 5,
                visibility_timeout_secs: 300,
                max_receives: 3,
            },
            sandbox: SandboxConfig {
                work_root: std::env::temp_dir(),
                memory_ceiling_mb: 512,
                cpus: 1.0,
                pids_limit: 128,
                timeout_grace_ms: 1000,
                compile_timeout_ms: 30_000,
            },
            scratch: ScratchConfig {
                time_limit_ms: 5000,
                memory_limit_kb: 256 * 1024,
            },
            lookup_retries: 3,
            lookup_backoff_ms: 200,
        }
    }
}

impl ArbiterConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |key: &str, default: String| lookup(key).unwrap_or(default);

        Ok(Self {
            redis_url: get("REDIS_URL", d.redis_url),
            languages_path: PathBuf::from(get(
                "ARBITER_LANGUAGES",
                d.languages_path.display().to_string(),
            )),
            api_addr: get("API_ADDR", d.api_addr),
            queue: QueueConfig {
                name: get("ARBITER_QUEUE", d.queue.name),
                poll_timeout_secs: parse(&lookup, "ARBITER_POLL_TIMEOUT_SECS", d.queue.poll_timeout_secs)?,
                visibility_timeout_secs: parse(
                    &lookup,
                    "ARBITER_VISIBILITY_TIMEOUT_SECS",
                    d.queue.visibility_timeout_secs,
                )?,
                max_receives: parse(&lookup, "ARBITER_MAX_RECEIVES", d.queue.max_receives)?,
            },
            sandbox: SandboxConfig {
                work_root: lookup("ARBITER_WORK_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(d.sandbox.work_root),
                memory_ceiling_mb: parse(&lookup, "ARBITER_SANDBOX_MEMORY_MB", d.sandbox.memory_ceiling_mb)?,
                cpus: parse(&lookup, "ARBITER_SANDBOX_CPUS", d.sandbox.cpus)?,
                pids_limit: parse(&lookup, "ARBITER_SANDBOX_PIDS", d.sandbox.pids_limit)?,
                timeout_grace_ms: parse(&lookup, "ARBITER_TIMEOUT_GRACE_MS", d.sandbox.timeout_grace_ms)?,
                compile_timeout_ms: parse(&lookup, "ARBITER_COMPILE_TIMEOUT_MS", d.sandbox.compile_timeout_ms)?,
            },
            scratch: ScratchConfig {
                time_limit_ms: parse(&lookup, "ARBITER_SCRATCH_TIME_LIMIT_MS", d.scratch.time_limit_ms)?,
                memory_limit_kb: parse(&lookup, "ARBITER_SCRATCH_MEMORY_LIMIT_KB", d.scratch.memory_limit_kb)?,
            },
            lookup_retries: parse(&lookup, "ARBITER_LOOKUP_RETRIES", d.lookup_retries)?,
            lookup_backoff_ms: parse(&lookup, "ARBITER_LOOKUP_BACKOFF_MS", d.lookup_backoff_ms)?,
        })
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.poll_timeout_secs)
    }

    /// Retry policy for submissions not yet visible after intake
    pub fn lookup_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lookup_retries,
            Backoff::Linear(Duration::from_millis(self.lookup_backoff_ms)),
        )
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            key: key.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ArbiterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.queue.max_receives, 3);
        assert_eq!(config.sandbox.memory_ceiling_mb, 512);
        assert_eq!(config.sandbox.compile_timeout_ms, 30_000);
        assert_eq!(config.lookup_retry().max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = ArbiterConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://redis:6379"),
            ("ARBITER_MAX_RECEIVES", "5"),
            ("ARBITER_SANDBOX_CPUS", "0.5"),
            ("ARBITER_COMPILE_TIMEOUT_MS", "60000"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url, "redis://redis:6379");
        assert_eq!(config.queue.max_receives, 5);
        assert_eq!(config.sandbox.cpus, 0.5);
        assert_eq!(config.sandbox.compile_timeout_ms, 60_000);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ArbiterConfig::from_lookup(lookup_from(&[("ARBITER_POLL_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert_eq!(err.key, "ARBITER_POLL_TIMEOUT_SECS");
    }
}
