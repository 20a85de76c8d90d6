//! Daemon IPC protocol
//!
//! One JSON object per connection, newline-terminated response. Requests
//! carry an `id` the response echoes, so a future client could multiplex;
//! the current client opens one connection per request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Readiness marker printed on the worker's stdout once it is serving.
pub const READY_MARKER: &str = "DAEMON_READY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Ping,
    ListTools,
    CallTool,
    GetInstructions,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(id: u64, data: Option<Value>) -> Self {
        Self { id, success: true, data, error: None }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self { id, success: false, data: None, error: Some(message.into()) }
    }
}
