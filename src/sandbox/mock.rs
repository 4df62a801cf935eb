//! Echo backend used when Docker is unavailable.
//!
//! Completes every script immediately with `{"echo": <first 100 chars>}`.
//! No isolation, no suspension support; development convenience only.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{Outcome, ResumeHandle, SandboxBackend, SandboxError};

#[derive(Debug, Default)]
pub struct EchoSandbox;

#[async_trait]
impl SandboxBackend for EchoSandbox {
    async fn run(
        &self,
        script: &str,
        _env_secrets: &HashMap<String, String>,
        _timeout: Duration,
    ) -> Result<Outcome, SandboxError> {
        let preview: String = script.chars().take(100).collect();
        Ok(Outcome::Completed {
            result: Some(serde_json::json!({ "echo": preview })),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn resume(
        &self,
        _handle: &ResumeHandle,
        _llm_response: &str,
    ) -> Result<Outcome, SandboxError> {
        Err(SandboxError::Protocol(
            "echo backend never suspends".to_string(),
        ))
    }

    async fn abort(&self, _handle: &ResumeHandle) -> Result<(), SandboxError> {
        Ok(())
    }
}
