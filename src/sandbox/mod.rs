//! Sandbox abstraction: what the core demands of an isolated worker.
//!
//! The concrete sandbox (container runtime, network policy, filesystem
//! confinement) is pluggable. The core drives it exclusively through
//! [`SandboxBackend`] and observes a closed [`Outcome`] sum; in particular,
//! a script pausing at `llm.complete` surfaces as [`Outcome::Suspended`]
//! with an opaque resume handle - the language-level pause mechanism never
//! crosses the process boundary.

pub mod docker;
pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::{DockerSandbox, DockerSandboxConfig};
pub use mock::EchoSandbox;

/// Opaque handle identifying a suspended execution inside a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeHandle(String);

impl ResumeHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of driving a sandboxed execution one step.
#[derive(Debug)]
pub enum Outcome {
    Completed {
        result: Option<serde_json::Value>,
        stdout: String,
        stderr: String,
    },
    Failed {
        error: String,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        stdout: String,
        stderr: String,
    },
    /// Script paused at `llm.complete`; resume with the agent's response.
    Suspended {
        prompt: String,
        model: String,
        handle: ResumeHandle,
    },
}

#[derive(Debug, Error)]
pub enum SandboxError {
    /// Could not reach the worker (process dead, connection refused, ...).
    #[error("worker transport failed: {0}")]
    Transport(String),

    /// The worker answered, but not in the expected shape.
    #[error("worker protocol violation: {0}")]
    Protocol(String),

    /// The backend could not be brought up.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Contract between the worker pool and a sandbox implementation.
///
/// A slot stays busy from the first `run` call through the terminal outcome,
/// across any number of `Suspended` -> `resume` cycles. `abort` reclaims a
/// suspended worker whose resume will never come (LLM-wait timeout).
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Bring the sandbox up (pull/start containers, wait for health).
    async fn start(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Execute a script with injected credential values and an active-time
    /// budget. Returns on the first terminal outcome or suspension.
    async fn run(
        &self,
        script: &str,
        env_secrets: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Outcome, SandboxError>;

    /// Hand a suspended execution its LLM response and keep driving it.
    async fn resume(
        &self,
        handle: &ResumeHandle,
        llm_response: &str,
    ) -> Result<Outcome, SandboxError>;

    /// Kill a suspended execution and return the worker to a clean state.
    async fn abort(&self, handle: &ResumeHandle) -> Result<(), SandboxError>;

    /// Tear the sandbox down.
    async fn shutdown(&self) {}
}
