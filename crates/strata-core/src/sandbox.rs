//! Sandbox supervisor port.
//!
//! Code tasks run in an isolated worker with no filesystem or network
//! access beyond an explicitly injected tool-call surface. The supervisor
//! never raises execution failures as Rust errors; syntax errors, runtime
//! exceptions, timeouts, and denied capabilities all come back as a
//! structured [`SandboxRun`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use strata_types::sandbox::{SandboxContext, SandboxRun, ToolDef};

/// Object-safe port for sandboxed code execution.
///
/// The worker is owned by the supervisor and never shared across tasks;
/// on timeout the supervisor terminates it.
pub trait SandboxSupervisor: Send + Sync {
    /// Execute a code snippet against the given context and restricted
    /// tool surface, enforcing `timeout`.
    fn execute<'a>(
        &'a self,
        code: &'a str,
        context: SandboxContext,
        tool_defs: &'a [ToolDef],
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = SandboxRun> + Send + 'a>>;
}
