//! Configuration for Airlock.
//!
//! Settings are loaded with priority: env var > default. Every knob lives
//! under the `AIRLOCK_` prefix so a deployment can be described entirely by
//! its environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Which sandbox backend the worker pool uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    /// Docker-managed worker containers (production).
    Docker,
    /// In-process echo backend, no isolation. Development fallback only.
    Mock,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Mock => "mock",
        }
    }
}

/// Worker pool and sandbox settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of sandbox workers (and containers, in docker mode).
    pub count: usize,
    /// Sandbox backend selection.
    pub mode: SandboxMode,
    /// Docker image for worker containers.
    pub image: String,
    /// Host port of the first worker; worker `i` listens on `port_base + i`.
    pub port_base: u16,
    /// Memory cap per container, in MB.
    pub memory_limit_mb: u64,
    /// CPU cap per container (fractional CPUs, passed to `--cpus`).
    pub cpus: f64,
    /// Destination hostnames the container's egress filter should allow.
    pub allowed_hosts: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 1,
            mode: SandboxMode::Docker,
            image: "airlock-worker".to_string(),
            port_base: 8001,
            memory_limit_mb: 512,
            cpus: 1.0,
            allowed_hosts: Vec::new(),
        }
    }
}

impl WorkerConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mode = match optional_env("AIRLOCK_SANDBOX").as_deref() {
            None | Some("docker") => SandboxMode::Docker,
            Some("mock") => SandboxMode::Mock,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "AIRLOCK_SANDBOX",
                    format!("unknown mode '{other}' (expected 'docker' or 'mock')"),
                ));
            }
        };
        Ok(Self {
            count: parse_env("AIRLOCK_WORKERS", defaults.count)?.max(1),
            mode,
            image: optional_env("AIRLOCK_WORKER_IMAGE").unwrap_or(defaults.image),
            port_base: parse_env("AIRLOCK_WORKER_PORT_BASE", defaults.port_base)?,
            memory_limit_mb: parse_env("AIRLOCK_WORKER_MEMORY_MB", defaults.memory_limit_mb)?,
            cpus: parse_env("AIRLOCK_WORKER_CPUS", defaults.cpus)?,
            allowed_hosts: optional_env("AIRLOCK_ALLOWED_HOSTS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the master-key file and the store.
    pub data_dir: PathBuf,
    /// Port the HTTP surface listens on.
    pub port: u16,
    /// How long a suspended execution waits for an LLM response.
    pub llm_wait_timeout: Duration,
    /// Default per-execution timeout when the request omits one.
    pub default_exec_timeout: Duration,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            port: 9090,
            llm_wait_timeout: Duration::from_secs(300),
            default_exec_timeout: Duration::from_secs(60),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: optional_env("AIRLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            port: parse_env("AIRLOCK_PORT", defaults.port)?,
            llm_wait_timeout: Duration::from_secs(parse_env(
                "AIRLOCK_LLM_WAIT_TIMEOUT_SECS",
                defaults.llm_wait_timeout.as_secs(),
            )?),
            default_exec_timeout: Duration::from_secs(parse_env(
                "AIRLOCK_DEFAULT_TIMEOUT_SECS",
                defaults.default_exec_timeout.as_secs(),
            )?),
            worker: WorkerConfig::resolve()?,
        })
    }
}

fn optional_env(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(var) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
        None => Ok(default),
    }
}
