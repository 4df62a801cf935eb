//! Test doubles shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::sandbox::{Outcome, ResumeHandle, SandboxBackend, SandboxError};

/// Sandbox backend that replays a programmed sequence of outcomes.
///
/// `run` and `resume` pop the next scripted step; an empty queue completes
/// with no result. Aborted handles are recorded for assertions.
#[derive(Default)]
pub struct ScriptedSandbox {
    steps: Mutex<VecDeque<Result<Outcome, SandboxError>>>,
    aborted: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub async fn push_outcome(&self, outcome: Outcome) {
        self.steps.lock().await.push_back(Ok(outcome));
    }

    pub async fn push_error(&self, error: SandboxError) {
        self.steps.lock().await.push_back(Err(error));
    }

    pub async fn aborted_handles(&self) -> Vec<String> {
        self.aborted.lock().await.clone()
    }

    async fn next_step(&self) -> Result<Outcome, SandboxError> {
        self.steps.lock().await.pop_front().unwrap_or(Ok(Outcome::Completed {
            result: None,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}

#[async_trait]
impl SandboxBackend for ScriptedSandbox {
    async fn run(
        &self,
        _script: &str,
        _env_secrets: &HashMap<String, String>,
        _timeout: Duration,
    ) -> Result<Outcome, SandboxError> {
        self.next_step().await
    }

    async fn resume(
        &self,
        _handle: &ResumeHandle,
        _llm_response: &str,
    ) -> Result<Outcome, SandboxError> {
        self.next_step().await
    }

    async fn abort(&self, handle: &ResumeHandle) -> Result<(), SandboxError> {
        self.aborted.lock().await.push(handle.as_str().to_string());
        Ok(())
    }
}
