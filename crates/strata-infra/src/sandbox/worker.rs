//! Process sandbox supervisor.
//!
//! Each execution spawns a fresh worker subprocess: a Deno runtime started
//! with no permission flags, which means its default deny-all sandbox --
//! no filesystem, no network, no env. The harness script's only capability
//! is the stdio bridge; tool calls the snippet makes through `mcp.*` are
//! checked against the declared tool surface here and executed by the
//! supervisor's own invoker. On timeout the worker is killed and the run
//! is reported as a timeout failure. Workers are never shared across tasks.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde_json::Value;
use strata_core::sandbox::SandboxSupervisor;
use strata_core::tool::ToolInvoker;
use strata_types::sandbox::{
    SandboxContext, SandboxErrorKind, SandboxRun, ToolDef, Trace, TracePhase, TraceSpan,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use super::protocol::{SupervisorMessage, WorkerContext, WorkerMessage, WorkerRequest};

/// The harness script shipped into every worker's scratch directory.
const HARNESS_JS: &str = include_str!("harness.js");

/// Default worker runtime binary.
const DEFAULT_RUNTIME: &str = "deno";

/// Prefix for capability indirections reachable from sandboxed code.
const CAP_PREFIX: &str = "$cap:";

// ---------------------------------------------------------------------------
// ProcessSandbox
// ---------------------------------------------------------------------------

/// Sandbox supervisor backed by per-execution worker subprocesses.
pub struct ProcessSandbox {
    invoker: Arc<dyn ToolInvoker>,
    runtime: String,
}

impl ProcessSandbox {
    /// Create a supervisor that bridges sandbox tool calls through the
    /// given invoker.
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            invoker,
            runtime: DEFAULT_RUNTIME.to_string(),
        }
    }

    /// Override the worker runtime binary (e.g. an absolute deno path).
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    async fn execute_inner(
        &self,
        code: &str,
        context: SandboxContext,
        tool_defs: &[ToolDef],
        timeout: Duration,
    ) -> SandboxRun {
        let clock = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        // The scratch dir must outlive the worker; it is removed on drop.
        let (mut child, stdin, _scratch) = match self.spawn_worker(code, &context).await {
            Ok(parts) => parts,
            Err(err) => {
                return SandboxRun::failure(
                    SandboxErrorKind::RuntimeError,
                    format!("failed to start sandbox worker: {err:#}"),
                    clock.elapsed().as_millis() as u64,
                );
            }
        };

        let run = self
            .converse(&mut child, stdin, &context, tool_defs, deadline, clock)
            .await;

        // kill_on_drop covers the error paths; reap the happy path.
        let _ = child.start_kill();
        run
    }

    /// Write the harness and request, then spawn the worker.
    async fn spawn_worker(
        &self,
        code: &str,
        context: &SandboxContext,
    ) -> Result<(Child, ChildStdin, tempfile::TempDir)> {
        let scratch = tempfile::tempdir().context("creating sandbox scratch dir")?;
        let harness_path = scratch.path().join("harness.js");
        tokio::fs::write(&harness_path, HARNESS_JS)
            .await
            .context("writing sandbox harness")?;

        let mut child = Command::new(&self.runtime)
            .arg("run")
            .arg("--quiet")
            .arg("--no-prompt")
            .arg(&harness_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning sandbox runtime '{}'", self.runtime))?;

        let mut stdin = child.stdin.take().context("worker stdin unavailable")?;

        let request = WorkerRequest {
            code: code.to_string(),
            context: WorkerContext {
                deps: context.deps.clone(),
                args: context.args.clone(),
            },
        };
        let mut line = serde_json::to_string(&request).context("encoding worker request")?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .context("writing worker request")?;

        Ok((child, stdin, scratch))
    }

    /// Drive the stdio conversation until the worker reports a result or
    /// the deadline fires.
    async fn converse(
        &self,
        child: &mut Child,
        mut stdin: ChildStdin,
        context: &SandboxContext,
        tool_defs: &[ToolDef],
        deadline: tokio::time::Instant,
        clock: std::time::Instant,
    ) -> SandboxRun {
        let Some(stdout) = child.stdout.take() else {
            return SandboxRun::failure(
                SandboxErrorKind::RuntimeError,
                "worker stdout unavailable",
                clock.elapsed().as_millis() as u64,
            );
        };
        let mut lines = BufReader::new(stdout).lines();

        let mut traces = vec![Trace {
            phase: TracePhase::Start,
            span: TraceSpan::Code,
            at: Utc::now(),
        }];
        let mut tools_called = Vec::new();

        loop {
            let line = match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    tracing::warn!(elapsed_ms = clock.elapsed().as_millis() as u64, "sandbox worker killed on timeout");
                    let mut run = SandboxRun::failure(
                        SandboxErrorKind::TimeoutError,
                        "worker killed after exceeding its timeout",
                        clock.elapsed().as_millis() as u64,
                    );
                    run.traces = traces;
                    run.tools_called = tools_called;
                    return run;
                }
                Ok(Err(err)) => {
                    let mut run = SandboxRun::failure(
                        SandboxErrorKind::RuntimeError,
                        format!("worker stdout read failed: {err}"),
                        clock.elapsed().as_millis() as u64,
                    );
                    run.traces = traces;
                    run.tools_called = tools_called;
                    return run;
                }
                Ok(Ok(None)) => {
                    // Forced termination or a crash before the result line.
                    let mut run = SandboxRun::failure(
                        SandboxErrorKind::RuntimeError,
                        "worker exited before returning a result",
                        clock.elapsed().as_millis() as u64,
                    );
                    run.traces = traces;
                    run.tools_called = tools_called;
                    return run;
                }
                Ok(Ok(Some(line))) => line,
            };

            let message: WorkerMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring malformed worker line");
                    continue;
                }
            };

            match message {
                WorkerMessage::ToolCall { id, name, args } => {
                    traces.push(Trace {
                        phase: TracePhase::Start,
                        span: TraceSpan::Tool { name: name.clone() },
                        at: Utc::now(),
                    });
                    tools_called.push(name.clone());

                    let answer = match resolve_tool_target(&name, tool_defs, &context.capabilities)
                    {
                        Some(target) => {
                            match tokio::time::timeout_at(
                                deadline,
                                self.invoker.invoke(&target, args),
                            )
                            .await
                            {
                                Ok(Ok(result)) => SupervisorMessage::ToolResult {
                                    id,
                                    result: Some(result),
                                    error: None,
                                    denied: false,
                                },
                                Ok(Err(err)) => SupervisorMessage::ToolResult {
                                    id,
                                    result: None,
                                    error: Some(err.to_string()),
                                    denied: false,
                                },
                                Err(_elapsed) => {
                                    let _ = child.start_kill();
                                    let mut run = SandboxRun::failure(
                                        SandboxErrorKind::TimeoutError,
                                        "worker killed after exceeding its timeout",
                                        clock.elapsed().as_millis() as u64,
                                    );
                                    traces.push(Trace {
                                        phase: TracePhase::End,
                                        span: TraceSpan::Tool { name },
                                        at: Utc::now(),
                                    });
                                    run.traces = traces;
                                    run.tools_called = tools_called;
                                    return run;
                                }
                            }
                        }
                        None => {
                            tracing::warn!(tool = name.as_str(), "sandbox tool call denied");
                            SupervisorMessage::ToolResult {
                                id,
                                result: None,
                                error: Some(format!(
                                    "tool '{name}' is not part of the sandbox surface"
                                )),
                                denied: true,
                            }
                        }
                    };

                    traces.push(Trace {
                        phase: TracePhase::End,
                        span: TraceSpan::Tool { name },
                        at: Utc::now(),
                    });

                    let mut line = match serde_json::to_string(&answer) {
                        Ok(line) => line,
                        Err(err) => {
                            let mut run = SandboxRun::failure(
                                SandboxErrorKind::RuntimeError,
                                format!("encoding tool result failed: {err}"),
                                clock.elapsed().as_millis() as u64,
                            );
                            run.traces = traces;
                            run.tools_called = tools_called;
                            return run;
                        }
                    };
                    line.push('\n');
                    if let Err(err) = stdin.write_all(line.as_bytes()).await {
                        let mut run = SandboxRun::failure(
                            SandboxErrorKind::RuntimeError,
                            format!("worker stdin write failed: {err}"),
                            clock.elapsed().as_millis() as u64,
                        );
                        run.traces = traces;
                        run.tools_called = tools_called;
                        return run;
                    }
                }
                WorkerMessage::Result {
                    success,
                    result,
                    error,
                } => {
                    traces.push(Trace {
                        phase: TracePhase::End,
                        span: TraceSpan::Code,
                        at: Utc::now(),
                    });
                    return SandboxRun {
                        success,
                        result,
                        error,
                        execution_time_ms: clock.elapsed().as_millis() as u64,
                        traces,
                        tools_called,
                    };
                }
            }
        }
    }
}

impl SandboxSupervisor for ProcessSandbox {
    fn execute<'a>(
        &'a self,
        code: &'a str,
        context: SandboxContext,
        tool_defs: &'a [ToolDef],
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = SandboxRun> + Send + 'a>> {
        Box::pin(self.execute_inner(code, context, tool_defs, timeout))
    }
}

// ---------------------------------------------------------------------------
// Tool surface resolution
// ---------------------------------------------------------------------------

/// Resolve an `mcp` member access to a concrete tool id.
///
/// Declared tool names map to themselves; `$cap:<uuid>` members resolve
/// through the registered capability indirections. Anything else is denied.
fn resolve_tool_target(
    name: &str,
    tool_defs: &[ToolDef],
    capabilities: &BTreeMap<String, String>,
) -> Option<String> {
    if let Some(cap_id) = name.strip_prefix(CAP_PREFIX) {
        return capabilities.get(cap_id).cloned();
    }
    tool_defs
        .iter()
        .any(|def| def.name == name)
        .then(|| name.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
