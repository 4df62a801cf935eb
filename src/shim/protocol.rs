//! Wire types shared by the worker server and the host-side sandbox client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    60
}

/// Request to execute a script inside the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub script: String,
    /// Credential values injected as environment variables for the run.
    #[serde(default)]
    pub settings: HashMap<String, String>,
    /// Max active execution time in seconds (suspended time excluded).
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

/// Resume a suspended execution with an LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub token: String,
    pub response: String,
}

/// Kill a suspended execution and reclaim the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortRequest {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Error,
    Timeout,
    Suspended,
}

/// Result of a run or resume call.
///
/// `prompt`, `model`, and `token` are present iff `status` is `suspended`;
/// stdout/stderr are reported with terminal statuses only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
