//! Sandbox execution types.
//!
//! These types cross the process boundary between the supervisor and its
//! worker, so everything here is serde-serializable. Failures inside the
//! sandbox are never raised as supervisor errors -- they come back as a
//! structured [`SandboxFailure`] inside the [`SandboxRun`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ToolDef
// ---------------------------------------------------------------------------

/// A tool exposed to sandboxed code through the restricted `mcp` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool identifier (`server:name`).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional JSON schema for the tool's arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl ToolDef {
    /// Shorthand for a tool with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxContext
// ---------------------------------------------------------------------------

/// Input context injected into a sandboxed snippet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxContext {
    /// Resolved dependency outputs, keyed by upstream task id.
    #[serde(default)]
    pub deps: BTreeMap<String, Value>,
    /// The task's argument payload.
    #[serde(default)]
    pub args: Value,
    /// Registered capability indirections: UUID -> target tool id. Snippets
    /// reach them through `mcp["$cap:<uuid>"]`.
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// SandboxRun
// ---------------------------------------------------------------------------

/// Result of one sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRun {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SandboxFailure>,
    pub execution_time_ms: u64,
    /// Start/end pairs for the outer snippet and every tool call, in
    /// temporal order.
    #[serde(default)]
    pub traces: Vec<Trace>,
    /// Names of tools the snippet invoked, in call order.
    #[serde(default)]
    pub tools_called: Vec<String>,
}

impl SandboxRun {
    /// A failed run with no traces.
    pub fn failure(kind: SandboxErrorKind, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(SandboxFailure {
                kind,
                message: message.into(),
            }),
            execution_time_ms: elapsed_ms,
            traces: Vec::new(),
            tools_called: Vec::new(),
        }
    }
}

/// A structured failure from inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxFailure {
    #[serde(rename = "type")]
    pub kind: SandboxErrorKind,
    pub message: String,
}

/// Classification of sandbox failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxErrorKind {
    RuntimeError,
    SyntaxError,
    TimeoutError,
    PermissionError,
}

impl SandboxErrorKind {
    /// The engine-level error code for this failure class.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxErrorKind::RuntimeError => "sandbox-runtime",
            SandboxErrorKind::SyntaxError => "sandbox-syntax",
            SandboxErrorKind::TimeoutError => "sandbox-timeout",
            SandboxErrorKind::PermissionError => "permission-denied",
        }
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// One trace record emitted by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Trace {
    pub phase: TracePhase,
    pub span: TraceSpan,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    Start,
    End,
}

/// What a trace record spans: the outer snippet or a single tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceSpan {
    Code,
    Tool { name: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
