//! External tool invocation port.
//!
//! MCP tools are hosted outside the engine; the core only needs a narrow
//! invocation surface. The trait is object-safe with boxed futures so
//! routers and sandboxes can hold `Arc<dyn ToolInvoker>`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Failure of an external tool invocation. Always fatal for the task.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool identifier is unknown to the gateway.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// The tool ran and reported a failure.
    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },

    /// Transport-level failure reaching the tool host.
    #[error("tool transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// ToolInvoker
// ---------------------------------------------------------------------------

/// Object-safe port for invoking an externally-hosted tool.
///
/// Implementations live outside the core (the MCP gateway adapter); tests
/// substitute controllable doubles.
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool` (identified as `server:name`) with a JSON argument
    /// payload and return its JSON output.
    fn invoke<'a>(
        &'a self,
        tool: &'a str,
        args: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}
