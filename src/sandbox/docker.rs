//! Docker-backed sandbox: one worker container per pool slot.
//!
//! The container runs the `airlock-worker` binary and is driven over HTTP
//! (`/run`, `/resume`, `/abort`). Lifecycle goes through the `docker` CLI:
//! a handful of `run`/`stop`/`rm` invocations with the isolation flags the
//! worker contract requires - read-only root with a tmpfs scratch area,
//! non-root user, all capabilities dropped, memory and CPU caps.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::shim::protocol::{AbortRequest, ResumeRequest, RunRequest, RunResponse, RunStatus};

use super::{Outcome, ResumeHandle, SandboxBackend, SandboxError};

/// How long past the script budget an HTTP call may take before the worker
/// is declared unreachable.
const HTTP_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DockerSandboxConfig {
    /// Docker image for the worker container.
    pub image: String,
    /// Container name; also used for cleanup of leftovers.
    pub container_name: String,
    /// Host port mapped to the worker's in-container port.
    pub host_port: u16,
    /// Port the worker listens on inside the container.
    pub worker_port: u16,
    /// Memory cap in MB.
    pub memory_limit_mb: u64,
    /// CPU cap (fractional CPUs).
    pub cpus: f64,
    /// Hostnames the container's egress filter should allow. Handed to the
    /// container as AIRLOCK_ALLOWED_HOSTS; enforcement is the image's job.
    pub allowed_hosts: Vec<String>,
}

impl Default for DockerSandboxConfig {
    fn default() -> Self {
        Self {
            image: "airlock-worker".to_string(),
            container_name: "airlock-worker-0".to_string(),
            host_port: 8001,
            worker_port: 8001,
            memory_limit_mb: 512,
            cpus: 1.0,
            allowed_hosts: Vec::new(),
        }
    }
}

/// A single worker container and its HTTP client.
pub struct DockerSandbox {
    config: DockerSandboxConfig,
    client: reqwest::Client,
    /// Budget of the last `run`, used to bound resume-call HTTP timeouts.
    last_budget: tokio::sync::Mutex<Duration>,
}

impl DockerSandbox {
    pub fn new(config: DockerSandboxConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            last_budget: tokio::sync::Mutex::new(Duration::from_secs(60)),
        }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.config.host_port)
    }

    async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<RunResponse, SandboxError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::Protocol(format!(
                "worker returned {status}: {detail}"
            )));
        }
        response
            .json::<RunResponse>()
            .await
            .map_err(|e| SandboxError::Protocol(e.to_string()))
    }

    async fn wait_ready(&self) -> Result<(), SandboxError> {
        for _ in 0..30 {
            let probe = self
                .client
                .get(format!("{}/health", self.base_url()))
                .timeout(Duration::from_secs(2))
                .send()
                .await;
            if matches!(probe, Ok(ref r) if r.status().is_success()) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(SandboxError::Unavailable(format!(
            "worker container '{}' did not become healthy",
            self.config.container_name
        )))
    }
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    async fn start(&self) -> Result<(), SandboxError> {
        // Clean up any leftover container from a previous run.
        let _ = run_docker(&["rm", "-f", &self.config.container_name]).await;

        let port_map = format!("{}:{}", self.config.host_port, self.config.worker_port);
        let memory = format!("{}m", self.config.memory_limit_mb);
        let cpus = self.config.cpus.to_string();
        let allowed = format!(
            "AIRLOCK_ALLOWED_HOSTS={}",
            self.config.allowed_hosts.join(",")
        );
        let worker_port = format!("AIRLOCK_WORKER_LISTEN_PORT={}", self.config.worker_port);

        let (code, _out, err) = run_docker(&[
            "run",
            "-d",
            "--name",
            &self.config.container_name,
            "-p",
            &port_map,
            "--read-only",
            "--tmpfs",
            "/tmp:rw,size=64m,mode=1777",
            "--user",
            "1000:1000",
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges:true",
            "--memory",
            &memory,
            "--cpus",
            &cpus,
            "-e",
            &allowed,
            "-e",
            &worker_port,
            &self.config.image,
        ])
        .await?;
        if code != 0 {
            return Err(SandboxError::Unavailable(format!(
                "failed to start worker container '{}': {}",
                self.config.container_name,
                err.trim()
            )));
        }

        self.wait_ready().await?;
        tracing::info!(
            container = %self.config.container_name,
            port = self.config.host_port,
            "Worker container is ready"
        );
        Ok(())
    }

    async fn run(
        &self,
        script: &str,
        env_secrets: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Outcome, SandboxError> {
        *self.last_budget.lock().await = timeout;
        let request = RunRequest {
            script: script.to_string(),
            settings: env_secrets.clone(),
            timeout: timeout.as_secs().max(1),
        };
        let response = self.post("/run", &request, timeout + HTTP_MARGIN).await?;
        outcome_from_response(response)
    }

    async fn resume(
        &self,
        handle: &ResumeHandle,
        llm_response: &str,
    ) -> Result<Outcome, SandboxError> {
        let budget = *self.last_budget.lock().await;
        let request = ResumeRequest {
            token: handle.as_str().to_string(),
            response: llm_response.to_string(),
        };
        let response = self.post("/resume", &request, budget + HTTP_MARGIN).await?;
        outcome_from_response(response)
    }

    async fn abort(&self, handle: &ResumeHandle) -> Result<(), SandboxError> {
        let request = AbortRequest {
            token: handle.as_str().to_string(),
        };
        self.post("/abort", &request, HTTP_MARGIN).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        if let Err(e) = run_docker(&["stop", "-t", "5", &self.config.container_name]).await {
            tracing::warn!(container = %self.config.container_name, error = %e, "Failed to stop worker container");
        }
        if let Err(e) = run_docker(&["rm", "-f", &self.config.container_name]).await {
            tracing::warn!(container = %self.config.container_name, error = %e, "Failed to remove worker container");
        }
    }
}

fn outcome_from_response(response: RunResponse) -> Result<Outcome, SandboxError> {
    match response.status {
        RunStatus::Completed => Ok(Outcome::Completed {
            result: response.result,
            stdout: response.stdout,
            stderr: response.stderr,
        }),
        RunStatus::Error => Ok(Outcome::Failed {
            error: response
                .error
                .unwrap_or_else(|| "script failed without detail".to_string()),
            stdout: response.stdout,
            stderr: response.stderr,
        }),
        RunStatus::Timeout => Ok(Outcome::TimedOut {
            stdout: response.stdout,
            stderr: response.stderr,
        }),
        RunStatus::Suspended => {
            let (Some(prompt), Some(token)) = (response.prompt, response.token) else {
                return Err(SandboxError::Protocol(
                    "suspended response missing prompt or token".to_string(),
                ));
            };
            Ok(Outcome::Suspended {
                prompt,
                model: response.model.unwrap_or_else(|| "default".to_string()),
                handle: ResumeHandle::new(token),
            })
        }
    }
}

/// Run a docker CLI command, returning (exit code, stdout, stderr).
async fn run_docker(args: &[&str]) -> Result<(i32, String, String), SandboxError> {
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| SandboxError::Unavailable(format!("docker CLI not runnable: {e}")))?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_conversion_covers_all_statuses() {
        let completed = RunResponse {
            status: RunStatus::Completed,
            result: Some(serde_json::json!(2)),
            stdout: "out".into(),
            stderr: String::new(),
            error: None,
            prompt: None,
            model: None,
            token: None,
        };
        assert!(matches!(
            outcome_from_response(completed).unwrap(),
            Outcome::Completed { result: Some(_), .. }
        ));

        let suspended = RunResponse {
            status: RunStatus::Suspended,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            prompt: Some("p".into()),
            model: None,
            token: Some("t".into()),
        };
        match outcome_from_response(suspended).unwrap() {
            Outcome::Suspended { prompt, model, handle } => {
                assert_eq!(prompt, "p");
                assert_eq!(model, "default");
                assert_eq!(handle.as_str(), "t");
            }
            other => panic!("expected Suspended, got {other:?}"),
        }
    }

    #[test]
    fn suspended_without_token_is_protocol_error() {
        let bad = RunResponse {
            status: RunStatus::Suspended,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            prompt: Some("p".into()),
            model: None,
            token: None,
        };
        assert!(matches!(
            outcome_from_response(bad),
            Err(SandboxError::Protocol(_))
        ));
    }
}
