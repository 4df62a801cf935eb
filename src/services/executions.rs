//! Execution history: typed status, persisted records, startup recovery.
//!
//! In-flight state lives in the dispatcher's memory; this service owns what
//! survives a restart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{ExecutionFilter, ExecutionRow, Store, StoreError};

/// Possible states of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    AwaitingLlm,
    Completed,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingLlm => "awaiting_llm",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Terminal statuses are final: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "awaiting_llm" => Some(Self::AwaitingLlm),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pending LLM call of a suspended execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum ExecutionHistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service over persisted execution records.
#[derive(Clone)]
pub struct ExecutionService {
    store: Store,
}

impl ExecutionService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an accepted execution in `pending` state.
    pub fn create(
        &self,
        execution_id: &str,
        profile_id: &str,
        script: &str,
    ) -> Result<(), ExecutionHistoryError> {
        self.store.insert_execution(execution_id, profile_id, script)?;
        Ok(())
    }

    /// Persist a terminal outcome. Only terminal statuses reach the store;
    /// intermediate state stays in the dispatcher's memory.
    #[allow(clippy::too_many_arguments)]
    pub fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<&serde_json::Value>,
        stdout: &str,
        stderr: &str,
        error: Option<&str>,
        execution_time_ms: Option<i64>,
    ) -> Result<(), ExecutionHistoryError> {
        debug_assert!(status.is_terminal());
        let result_json = result.map(|v| v.to_string());
        self.store.finish_execution(
            execution_id,
            status.as_str(),
            result_json.as_deref(),
            stdout,
            stderr,
            error,
            execution_time_ms,
        )?;
        Ok(())
    }

    pub fn get(&self, execution_id: &str) -> Result<Option<ExecutionRow>, ExecutionHistoryError> {
        Ok(self.store.get_execution(execution_id)?)
    }

    pub fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRow>, ExecutionHistoryError> {
        Ok(self.store.list_executions(filter)?)
    }

    /// Best-effort restart recovery: every persisted non-terminal record is
    /// failed with the given message. Returns how many were touched.
    pub fn fail_inflight(&self, message: &str) -> Result<usize, ExecutionHistoryError> {
        let touched = self.store.fail_inflight_executions(message)?;
        if touched > 0 {
            tracing::warn!(count = touched, "Marked in-flight executions as failed after restart");
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::AwaitingLlm,
            ExecutionStatus::Completed,
            ExecutionStatus::Error,
            ExecutionStatus::Timeout,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn only_the_three_terminal_statuses_are_terminal() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::AwaitingLlm.is_terminal());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::AwaitingLlm).unwrap();
        assert_eq!(json, "\"awaiting_llm\"");
    }

    #[test]
    fn finish_persists_terminal_record() {
        let store = Store::in_memory().unwrap();
        store.insert_profile("p1", "").unwrap();
        let svc = ExecutionService::new(store);

        svc.create("exec_1", "p1", "print(1)").unwrap();
        svc.finish(
            "exec_1",
            ExecutionStatus::Completed,
            Some(&serde_json::json!(2)),
            "out\n",
            "",
            None,
            Some(40),
        )
        .unwrap();

        let row = svc.get("exec_1").unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.result.as_deref(), Some("2"));
        assert_eq!(row.execution_time_ms, Some(40));
        assert!(row.completed_at.is_some());
    }
}
