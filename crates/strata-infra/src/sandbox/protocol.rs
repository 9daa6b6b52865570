//! Line-delimited JSON protocol between the supervisor and its worker.
//!
//! The supervisor writes one [`WorkerRequest`] to the worker's stdin, then
//! reads [`WorkerMessage`] lines from its stdout. Tool calls flow out of
//! the worker and are answered with [`SupervisorMessage::ToolResult`]
//! lines; the conversation ends with the worker's single `result` message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strata_types::sandbox::SandboxFailure;

// ---------------------------------------------------------------------------
// Supervisor -> worker
// ---------------------------------------------------------------------------

/// The single request written to the worker's stdin.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    pub context: WorkerContext,
}

/// Snippet-visible context. Capability indirections stay on the supervisor
/// side; the worker only ever sees tool names it asked for.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkerContext {
    #[serde(default)]
    pub deps: BTreeMap<String, Value>,
    #[serde(default)]
    pub args: Value,
}

/// Answers to tool calls, written as stdin lines after the request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    ToolResult {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// True when the call was refused by the restricted surface, so the
        /// worker raises it as a permission error rather than a tool error.
        #[serde(default)]
        denied: bool,
    },
}

// ---------------------------------------------------------------------------
// Worker -> supervisor
// ---------------------------------------------------------------------------

/// Messages read from the worker's stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The snippet invoked `mcp.<name>(args)`.
    ToolCall {
        id: u64,
        name: String,
        #[serde(default)]
        args: Value,
    },
    /// Terminal: the snippet finished (or failed in a classified way).
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<SandboxFailure>,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
