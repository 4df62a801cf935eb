//! Per-execution state machine and polling interface.
//!
//! The dispatcher owns one in-memory record per in-flight execution and one
//! driving task that walks it through:
//!
//! ```text
//! pending -> running -> completed | error | timeout
//!               ^  \
//!               |   v
//!            awaiting_llm   (any number of cycles)
//! ```
//!
//! Terminal records are persisted through the execution history service and
//! sanitized before they become observable. Status observations within one
//! execution are monotonic: the driving task and `respond` are the only
//! writers, and nothing mutates a terminal snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tokio::time::Instant;

use crate::sanitize::Sanitizer;
use crate::sandbox::Outcome;
use crate::services::executions::{ExecutionHistoryError, ExecutionService, ExecutionStatus, LlmRequest};
use crate::store::ExecutionRow;
use crate::worker::WorkerPool;

/// Extra slack on top of the script budget before a silent worker is
/// declared hung.
const WORKER_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Execution {0} not found")]
    NotFound(String),

    #[error("Execution is '{status}', not 'awaiting_llm'")]
    WrongState { status: ExecutionStatus },

    #[error(transparent)]
    History(#[from] ExecutionHistoryError),
}

/// Deep copy of an execution's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_request: Option<LlmRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
}

impl ExecutionSnapshot {
    fn new(execution_id: String) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Pending,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            llm_request: None,
            execution_time_ms: None,
        }
    }
}

struct ExecutionEntry {
    snapshot: ExecutionSnapshot,
    /// Wakes the driving task when an LLM response arrives. Present iff the
    /// execution is awaiting one.
    responder: Option<oneshot::Sender<String>>,
}

/// Coordinates in-flight executions across the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    executions: Arc<RwLock<HashMap<String, ExecutionEntry>>>,
    pool: WorkerPool,
    history: ExecutionService,
    llm_wait_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, history: ExecutionService, llm_wait_timeout: Duration) -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
            pool,
            history,
            llm_wait_timeout,
        }
    }

    /// Accept an execution: create the pending record, spawn its driving
    /// task, and return immediately. All auth work is already done.
    pub async fn submit(
        &self,
        profile_id: &str,
        script: String,
        secrets: HashMap<String, SecretString>,
        timeout: Duration,
    ) -> Result<String, DispatchError> {
        let execution_id = format!("exec_{}", uuid::Uuid::new_v4().simple());
        self.history.create(&execution_id, profile_id, &script)?;

        self.executions.write().await.insert(
            execution_id.clone(),
            ExecutionEntry {
                snapshot: ExecutionSnapshot::new(execution_id.clone()),
                responder: None,
            },
        );

        let dispatcher = self.clone();
        let id = execution_id.clone();
        tokio::spawn(async move {
            dispatcher.drive(id, script, secrets, timeout).await;
        });

        tracing::info!(execution_id = %execution_id, profile_id, "Accepted execution");
        Ok(execution_id)
    }

    /// Current state of an execution. Falls back to the persisted record for
    /// ids no longer held in memory.
    pub async fn poll(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>, DispatchError> {
        if let Some(entry) = self.executions.read().await.get(execution_id) {
            return Ok(Some(entry.snapshot.clone()));
        }
        Ok(self.history.get(execution_id)?.map(snapshot_from_row))
    }

    /// Deliver an LLM response to a suspended execution.
    pub async fn respond(
        &self,
        execution_id: &str,
        response: String,
    ) -> Result<ExecutionSnapshot, DispatchError> {
        let mut executions = self.executions.write().await;
        let entry = executions
            .get_mut(execution_id)
            .ok_or_else(|| DispatchError::NotFound(execution_id.to_string()))?;

        if entry.snapshot.status != ExecutionStatus::AwaitingLlm {
            return Err(DispatchError::WrongState {
                status: entry.snapshot.status,
            });
        }
        let responder = entry.responder.take().ok_or(DispatchError::WrongState {
            status: entry.snapshot.status,
        })?;
        if responder.send(response).is_err() {
            // The LLM wait timed out concurrently; the record is on its way
            // to a terminal error.
            return Err(DispatchError::WrongState {
                status: ExecutionStatus::Error,
            });
        }

        entry.snapshot.status = ExecutionStatus::Running;
        entry.snapshot.llm_request = None;
        Ok(entry.snapshot.clone())
    }

    async fn drive(
        self,
        execution_id: String,
        script: String,
        secrets: HashMap<String, SecretString>,
        timeout: Duration,
    ) {
        let sanitizer = Sanitizer::new(
            secrets
                .values()
                .map(|secret| secret.expose_secret().to_string()),
        );
        let timeout_error = format!("Script exceeded {}s timeout", timeout.as_secs());

        // Waiting for a slot counts against the execution budget.
        let queued_at = Instant::now();
        let slot = match tokio::time::timeout(timeout, self.pool.acquire()).await {
            Ok(slot) => slot,
            Err(_) => {
                self.finish(
                    &execution_id,
                    ExecutionStatus::Timeout,
                    None,
                    String::new(),
                    String::new(),
                    Some(timeout_error),
                    &sanitizer,
                    timeout,
                )
                .await;
                return;
            }
        };

        self.set_running(&execution_id).await;
        let backend = slot.backend();
        let env: HashMap<String, String> = secrets
            .iter()
            .map(|(name, value)| (name.clone(), value.expose_secret().to_string()))
            .collect();

        // Active time: everything except suspension at llm.complete.
        let mut active = queued_at.elapsed();
        let mut segment = Instant::now();
        let mut budget = timeout.saturating_sub(active);
        let mut outcome = tokio::time::timeout(budget + WORKER_GRACE, backend.run(&script, &env, budget))
            .await
            .unwrap_or_else(|_| {
                Err(crate::sandbox::SandboxError::Transport(
                    "worker stopped responding".to_string(),
                ))
            });

        loop {
            match outcome {
                Ok(Outcome::Completed {
                    result,
                    stdout,
                    stderr,
                }) => {
                    active += segment.elapsed();
                    self.finish(
                        &execution_id,
                        ExecutionStatus::Completed,
                        result,
                        stdout,
                        stderr,
                        None,
                        &sanitizer,
                        active,
                    )
                    .await;
                    break;
                }
                Ok(Outcome::Failed {
                    error,
                    stdout,
                    stderr,
                }) => {
                    active += segment.elapsed();
                    self.finish(
                        &execution_id,
                        ExecutionStatus::Error,
                        None,
                        stdout,
                        stderr,
                        Some(error),
                        &sanitizer,
                        active,
                    )
                    .await;
                    break;
                }
                Ok(Outcome::TimedOut { stdout, stderr }) => {
                    active += segment.elapsed();
                    self.finish(
                        &execution_id,
                        ExecutionStatus::Timeout,
                        None,
                        stdout,
                        stderr,
                        Some(timeout_error.clone()),
                        &sanitizer,
                        active,
                    )
                    .await;
                    break;
                }
                Ok(Outcome::Suspended {
                    prompt,
                    model,
                    handle,
                }) => {
                    active += segment.elapsed();

                    let (tx, rx) = oneshot::channel();
                    self.set_awaiting(&execution_id, prompt, model, tx).await;

                    match tokio::time::timeout(self.llm_wait_timeout, rx).await {
                        Ok(Ok(response)) => {
                            budget = timeout.saturating_sub(active);
                            if budget.is_zero() {
                                let _ = backend.abort(&handle).await;
                                self.finish(
                                    &execution_id,
                                    ExecutionStatus::Timeout,
                                    None,
                                    String::new(),
                                    String::new(),
                                    Some(timeout_error.clone()),
                                    &sanitizer,
                                    active,
                                )
                                .await;
                                break;
                            }
                            segment = Instant::now();
                            outcome = tokio::time::timeout(
                                budget + WORKER_GRACE,
                                backend.resume(&handle, &response),
                            )
                            .await
                            .unwrap_or_else(|_| {
                                Err(crate::sandbox::SandboxError::Transport(
                                    "worker stopped responding".to_string(),
                                ))
                            });
                        }
                        Ok(Err(_)) => {
                            // Sender dropped without a value; treat as fatal.
                            let _ = backend.abort(&handle).await;
                            self.finish(
                                &execution_id,
                                ExecutionStatus::Error,
                                None,
                                String::new(),
                                String::new(),
                                Some("worker failure".to_string()),
                                &sanitizer,
                                active,
                            )
                            .await;
                            break;
                        }
                        Err(_) => {
                            if let Err(e) = backend.abort(&handle).await {
                                tracing::warn!(
                                    execution_id = %execution_id,
                                    error = %e,
                                    "Failed to abort suspended worker"
                                );
                            }
                            self.clear_responder(&execution_id).await;
                            self.finish(
                                &execution_id,
                                ExecutionStatus::Error,
                                None,
                                String::new(),
                                String::new(),
                                Some(format!(
                                    "No LLM response received within {}s",
                                    self.llm_wait_timeout.as_secs()
                                )),
                                &sanitizer,
                                active,
                            )
                            .await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        execution_id = %execution_id,
                        error = %e,
                        "Worker failed while driving execution"
                    );
                    active += segment.elapsed();
                    self.finish(
                        &execution_id,
                        ExecutionStatus::Error,
                        None,
                        String::new(),
                        String::new(),
                        Some("worker failure".to_string()),
                        &sanitizer,
                        active,
                    )
                    .await;
                    break;
                }
            }
        }
        // Slot is released here, at the terminal outcome, never earlier.
        drop(slot);
    }

    async fn set_running(&self, execution_id: &str) {
        let mut executions = self.executions.write().await;
        if let Some(entry) = executions.get_mut(execution_id) {
            entry.snapshot.status = ExecutionStatus::Running;
        }
    }

    async fn set_awaiting(
        &self,
        execution_id: &str,
        prompt: String,
        model: String,
        responder: oneshot::Sender<String>,
    ) {
        let mut executions = self.executions.write().await;
        if let Some(entry) = executions.get_mut(execution_id) {
            entry.snapshot.status = ExecutionStatus::AwaitingLlm;
            entry.snapshot.llm_request = Some(LlmRequest { prompt, model });
            entry.responder = Some(responder);
        }
    }

    async fn clear_responder(&self, execution_id: &str) {
        let mut executions = self.executions.write().await;
        if let Some(entry) = executions.get_mut(execution_id) {
            entry.responder = None;
        }
    }

    /// Apply a terminal transition: sanitize every textual field, persist,
    /// then publish the snapshot.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        stdout: String,
        stderr: String,
        error: Option<String>,
        sanitizer: &Sanitizer,
        active: Duration,
    ) {
        let stdout = sanitizer.scrub(&stdout);
        let stderr = sanitizer.scrub(&stderr);
        let error = error.map(|e| sanitizer.scrub(&e));
        let result = result.map(|v| sanitizer.scrub_value(&v));
        let redacted = stdout.redacted
            || stderr.redacted
            || error.as_ref().is_some_and(|e| e.redacted)
            || result.as_ref().is_some_and(|(_, r)| *r);

        let result_value = result.map(|(v, _)| v);
        let error_text = error.map(|e| e.text);
        let elapsed_ms = active.as_millis().min(i64::MAX as u128) as i64;

        if let Err(e) = self.history.finish(
            execution_id,
            status,
            result_value.as_ref(),
            &stdout.text,
            &stderr.text,
            error_text.as_deref(),
            Some(elapsed_ms),
        ) {
            tracing::error!(execution_id = %execution_id, error = %e, "Failed to persist execution outcome");
        }

        let mut executions = self.executions.write().await;
        if let Some(entry) = executions.get_mut(execution_id) {
            if entry.snapshot.status.is_terminal() {
                return;
            }
            entry.responder = None;
            entry.snapshot.status = status;
            entry.snapshot.result = result_value;
            entry.snapshot.stdout = stdout.text;
            entry.snapshot.stderr = stderr.text;
            entry.snapshot.error = error_text;
            entry.snapshot.llm_request = None;
            entry.snapshot.execution_time_ms = Some(elapsed_ms);
        }

        tracing::info!(
            execution_id = %execution_id,
            status = %status,
            redacted,
            elapsed_ms,
            "Execution reached terminal state"
        );
    }
}

/// Rebuild a snapshot from a persisted record (post-restart polling).
fn snapshot_from_row(row: ExecutionRow) -> ExecutionSnapshot {
    ExecutionSnapshot {
        execution_id: row.id,
        status: ExecutionStatus::parse(&row.status).unwrap_or(ExecutionStatus::Error),
        result: row
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        stdout: row.stdout,
        stderr: row.stderr,
        error: row.error,
        llm_request: None,
        execution_time_ms: row.execution_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::sandbox::{Outcome, ResumeHandle, SandboxBackend};
    use crate::store::Store;
    use crate::testing::ScriptedSandbox;

    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, SecretString> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SecretString::from(v.to_string())))
            .collect()
    }

    fn dispatcher_with(backends: Vec<Arc<dyn SandboxBackend>>, llm_wait: Duration) -> Dispatcher {
        let store = Store::in_memory().unwrap();
        store.insert_profile("p1", "").unwrap();
        let history = ExecutionService::new(store);
        Dispatcher::new(WorkerPool::new(backends), history, llm_wait)
    }

    async fn poll_until_terminal(dispatcher: &Dispatcher, id: &str) -> ExecutionSnapshot {
        for _ in 0..200 {
            let snapshot = dispatcher.poll(id).await.unwrap().unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn completed_execution_is_sanitized_and_persisted() {
        let backend = ScriptedSandbox::default();
        backend
            .push_outcome(Outcome::Completed {
                result: Some(serde_json::json!(2)),
                stdout: "sk-live-abc1234\n".to_string(),
                stderr: String::new(),
            })
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit(
                "p1",
                "print(settings.get(\"API_KEY\"))".to_string(),
                secrets(&[("API_KEY", "sk-live-abc1234")]),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.result, Some(serde_json::json!(2)));
        assert_eq!(snapshot.stdout, "[REDACTED...1234]\n");
        assert!(snapshot.execution_time_ms.is_some());

        // The persisted record is sanitized too.
        let row = dispatcher.history.get(&id).unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(!row.stdout.contains("sk-live-abc1234"));
    }

    #[tokio::test]
    async fn suspension_roundtrip() {
        let backend = ScriptedSandbox::default();
        backend
            .push_outcome(Outcome::Suspended {
                prompt: "p".to_string(),
                model: "default".to_string(),
                handle: ResumeHandle::new("tok-1"),
            })
            .await;
        backend
            .push_outcome(Outcome::Completed {
                result: Some(serde_json::json!("R")),
                stdout: String::new(),
                stderr: String::new(),
            })
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit(
                "p1",
                "x = llm.complete(\"p\"); set_result(x)".to_string(),
                secrets(&[]),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        // Wait until the execution suspends.
        let mut awaiting = None;
        for _ in 0..200 {
            let snapshot = dispatcher.poll(&id).await.unwrap().unwrap();
            if snapshot.status == ExecutionStatus::AwaitingLlm {
                awaiting = Some(snapshot);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let awaiting = awaiting.expect("execution should reach awaiting_llm");
        let request = awaiting.llm_request.expect("llm_request present while awaiting");
        assert_eq!(request.prompt, "p");
        assert_eq!(request.model, "default");

        let after = dispatcher.respond(&id, "R".to_string()).await.unwrap();
        assert_eq!(after.status, ExecutionStatus::Running);
        assert!(after.llm_request.is_none());

        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.result, Some(serde_json::json!("R")));
    }

    #[tokio::test]
    async fn respond_in_wrong_state_is_rejected() {
        let backend = ScriptedSandbox::default();
        backend
            .push_outcome(Outcome::Completed {
                result: None,
                stdout: String::new(),
                stderr: String::new(),
            })
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit("p1", "pass".to_string(), secrets(&[]), Duration::from_secs(30))
            .await
            .unwrap();
        poll_until_terminal(&dispatcher, &id).await;

        match dispatcher.respond(&id, "R".to_string()).await {
            Err(DispatchError::WrongState { status }) => {
                assert_eq!(status, ExecutionStatus::Completed);
            }
            other => panic!("expected WrongState, got {other:?}"),
        }

        assert!(matches!(
            dispatcher.respond("exec_missing", "R".to_string()).await,
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn llm_wait_timeout_fails_the_execution_and_frees_the_slot() {
        let backend = Arc::new(ScriptedSandbox::default());
        backend
            .push_outcome(Outcome::Suspended {
                prompt: "p".to_string(),
                model: "default".to_string(),
                handle: ResumeHandle::new("tok-1"),
            })
            .await;

        let dispatcher = dispatcher_with(
            vec![backend.clone() as Arc<dyn SandboxBackend>],
            Duration::from_millis(100),
        );
        let id = dispatcher
            .submit("p1", "llm.complete(\"p\")".to_string(), secrets(&[]), Duration::from_secs(30))
            .await
            .unwrap();

        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Error);
        assert!(snapshot.error.unwrap().contains("No LLM response"));
        assert_eq!(backend.aborted_handles().await, vec!["tok-1".to_string()]);
        assert_eq!(dispatcher.pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn worker_timeout_outcome_maps_to_timeout_status() {
        let backend = ScriptedSandbox::default();
        backend
            .push_outcome(Outcome::TimedOut {
                stdout: "partial".to_string(),
                stderr: String::new(),
            })
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit("p1", "while True: pass".to_string(), secrets(&[]), Duration::from_secs(5))
            .await
            .unwrap();

        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Timeout);
        assert_eq!(snapshot.stdout, "partial");
        assert!(snapshot.error.unwrap().contains("5s timeout"));
    }

    #[tokio::test]
    async fn transport_failure_maps_to_opaque_worker_failure() {
        let backend = ScriptedSandbox::default();
        backend
            .push_error(crate::sandbox::SandboxError::Transport(
                "connection refused on 127.0.0.1:8001".to_string(),
            ))
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit("p1", "pass".to_string(), secrets(&[]), Duration::from_secs(5))
            .await
            .unwrap();

        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Error);
        // Internal transport detail is logged, not surfaced.
        assert_eq!(snapshot.error.as_deref(), Some("worker failure"));
    }

    #[tokio::test]
    async fn pending_execution_times_out_waiting_for_a_slot() {
        let backend = Arc::new(ScriptedSandbox::default());
        backend
            .push_outcome(Outcome::Suspended {
                prompt: "p".to_string(),
                model: "default".to_string(),
                handle: ResumeHandle::new("tok-hold"),
            })
            .await;

        // One slot, held in awaiting_llm by the first execution.
        let dispatcher = dispatcher_with(
            vec![backend as Arc<dyn SandboxBackend>],
            Duration::from_secs(300),
        );
        let holder = dispatcher
            .submit("p1", "llm.complete(\"p\")".to_string(), secrets(&[]), Duration::from_secs(30))
            .await
            .unwrap();
        for _ in 0..200 {
            let snapshot = dispatcher.poll(&holder).await.unwrap().unwrap();
            if snapshot.status == ExecutionStatus::AwaitingLlm {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let id = dispatcher
            .submit("p1", "pass".to_string(), secrets(&[]), Duration::from_millis(100))
            .await
            .unwrap();
        let snapshot = poll_until_terminal(&dispatcher, &id).await;
        assert_eq!(snapshot.status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn polling_never_regresses_past_terminal() {
        let backend = ScriptedSandbox::default();
        backend
            .push_outcome(Outcome::Completed {
                result: None,
                stdout: String::new(),
                stderr: String::new(),
            })
            .await;

        let dispatcher = dispatcher_with(vec![Arc::new(backend)], Duration::from_secs(300));
        let id = dispatcher
            .submit("p1", "pass".to_string(), secrets(&[]), Duration::from_secs(30))
            .await
            .unwrap();

        let terminal = poll_until_terminal(&dispatcher, &id).await;
        for _ in 0..20 {
            let again = dispatcher.poll(&id).await.unwrap().unwrap();
            assert_eq!(again.status, terminal.status);
        }
    }

    #[tokio::test]
    async fn poll_falls_back_to_history() {
        let store = Store::in_memory().unwrap();
        store.insert_profile("p1", "").unwrap();
        let history = ExecutionService::new(store);
        history.create("exec_old", "p1", "print(1)").unwrap();
        history
            .finish(
                "exec_old",
                ExecutionStatus::Completed,
                Some(&serde_json::json!(2)),
                "out",
                "",
                None,
                Some(40),
            )
            .unwrap();

        let pool = WorkerPool::new(vec![Arc::new(ScriptedSandbox::default()) as Arc<dyn SandboxBackend>]);
        let dispatcher = Dispatcher::new(pool, history, Duration::from_secs(300));

        let snapshot = dispatcher.poll("exec_old").await.unwrap().unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.result, Some(serde_json::json!(2)));

        assert!(dispatcher.poll("exec_unknown").await.unwrap().is_none());
    }
}
