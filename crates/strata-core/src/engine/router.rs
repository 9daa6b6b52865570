//! Per-task dispatch: sandbox for code tasks, tool invoker for the rest.
//!
//! The router produces a terminal [`TaskResult`] for every task it is
//! handed -- it never propagates an error upward. Tool failures are always
//! fatal; code failures are warnings iff the task is effectively
//! safe-to-fail. A `deny` permission decision short-circuits the task with
//! a permanent error before anything external is invoked.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use strata_types::dag::{TaskKind, TaskSpec};
use strata_types::permission::PermissionDecision;
use strata_types::sandbox::{SandboxContext, ToolDef};
use strata_types::state::{TaskResult, TaskStatus};
use tokio_util::sync::CancellationToken;

use crate::permission::PermissionResolver;
use crate::sandbox::SandboxSupervisor;
use crate::tool::ToolInvoker;

/// Well-known key under which resolved dependency outputs are injected,
/// both into tool argument payloads and into the sandbox context.
pub const DEPS_KEY: &str = "deps";

// ---------------------------------------------------------------------------
// TaskRouter
// ---------------------------------------------------------------------------

/// Dispatches one task to the sandbox supervisor or the tool invoker.
pub struct TaskRouter {
    invoker: Arc<dyn ToolInvoker>,
    sandbox: Arc<dyn SandboxSupervisor>,
    permissions: Arc<PermissionResolver>,
    /// The restricted tool surface exposed to sandboxed code.
    tool_defs: Vec<ToolDef>,
    task_timeout: Duration,
}

impl TaskRouter {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        sandbox: Arc<dyn SandboxSupervisor>,
        permissions: Arc<PermissionResolver>,
        tool_defs: Vec<ToolDef>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            sandbox,
            permissions,
            tool_defs,
            task_timeout,
        }
    }

    /// Run a task to a terminal result.
    pub async fn run(
        &self,
        task: &TaskSpec,
        deps: BTreeMap<String, TaskResult>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let outcome = match task.kind {
            TaskKind::CodeExecution => self.run_code(task, &deps, cancel).await,
            TaskKind::McpTool | TaskKind::Default => self.run_tool(task, &deps, cancel).await,
        };

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        let ended_at = Utc::now();

        match outcome {
            Outcome::Success(output) => TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Success,
                output: Some(output),
                error: None,
                execution_time_ms: elapsed_ms,
                started_at,
                ended_at,
            },
            Outcome::Failure { message, soft } => {
                let status = if soft {
                    TaskStatus::Warning
                } else {
                    TaskStatus::Error
                };
                TaskResult {
                    task_id: task.id.clone(),
                    status,
                    output: None,
                    error: Some(message),
                    execution_time_ms: elapsed_ms,
                    started_at,
                    ended_at,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tool path
    // -----------------------------------------------------------------------

    async fn run_tool(
        &self,
        task: &TaskSpec,
        deps: &BTreeMap<String, TaskResult>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Some(tool) = task.tool.as_deref().filter(|t| !t.is_empty()) else {
            return Outcome::fatal(format!("task '{}' has no tool to invoke", task.id));
        };

        if self.permissions.resolve(tool) == PermissionDecision::Deny {
            tracing::warn!(task_id = task.id.as_str(), tool, "tool denied by policy");
            return Outcome::fatal(format!(
                "permission-denied: tool '{tool}' is denied by policy"
            ));
        }

        let args = merge_deps_into_args(&task.arguments, deps);

        let invocation = tokio::time::timeout(self.task_timeout, self.invoker.invoke(tool, args));
        tokio::select! {
            _ = cancel.cancelled() => {
                Outcome::fatal("workflow-abort: task cancelled".to_string())
            }
            result = invocation => match result {
                Ok(Ok(output)) => Outcome::Success(output),
                Ok(Err(err)) => Outcome::fatal(err.to_string()),
                Err(_elapsed) => Outcome::fatal(format!(
                    "tool '{tool}' timed out after {}ms",
                    self.task_timeout.as_millis()
                )),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sandbox path
    // -----------------------------------------------------------------------

    async fn run_code(
        &self,
        task: &TaskSpec,
        deps: &BTreeMap<String, TaskResult>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let code = task.code.as_deref().unwrap_or_default();
        let soft = task.metadata.effective_safe_to_fail();

        let context = SandboxContext {
            deps: dep_outputs(deps),
            args: task.arguments.clone(),
            capabilities: capabilities_from_metadata(task),
        };

        let execution = self
            .sandbox
            .execute(code, context, &self.tool_defs, self.task_timeout);
        let run = tokio::select! {
            _ = cancel.cancelled() => {
                return Outcome::fatal("workflow-abort: task cancelled".to_string());
            }
            run = execution => run,
        };

        if run.success {
            Outcome::Success(run.result.unwrap_or(Value::Null))
        } else {
            let message = match run.error {
                Some(failure) => format!("{}: {}", failure.kind.code(), failure.message),
                None => "sandbox-runtime: worker returned no result".to_string(),
            };
            Outcome::Failure { message, soft }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

enum Outcome {
    Success(Value),
    Failure { message: String, soft: bool },
}

impl Outcome {
    fn fatal(message: String) -> Self {
        Outcome::Failure {
            message,
            soft: false,
        }
    }
}

/// Dependency outputs keyed by upstream task id. A failed-but-resolved
/// dependency (behind a condition gate) surfaces its error instead.
fn dep_outputs(deps: &BTreeMap<String, TaskResult>) -> BTreeMap<String, Value> {
    deps.iter()
        .map(|(id, result)| {
            let value = match (&result.output, &result.error) {
                (Some(output), _) => output.clone(),
                (None, Some(error)) => json!({ "error": error }),
                (None, None) => Value::Null,
            };
            (id.clone(), value)
        })
        .collect()
}

/// Merge dependency outputs into the tool argument payload under `deps`.
fn merge_deps_into_args(arguments: &Value, deps: &BTreeMap<String, TaskResult>) -> Value {
    let mut merged = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    if !deps.is_empty() {
        let outputs: Map<String, Value> = dep_outputs(deps).into_iter().collect();
        merged.insert(DEPS_KEY.to_string(), Value::Object(outputs));
    }
    Value::Object(merged)
}

/// Capability indirections declared in task metadata under `capabilities`:
/// a map of UUID strings to target tool ids, reachable from sandboxed code
/// as `mcp["$cap:<uuid>"]`.
fn capabilities_from_metadata(task: &TaskSpec) -> BTreeMap<String, String> {
    task.metadata
        .extra
        .get("capabilities")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use strata_types::dag::TaskMetadata;
    use strata_types::permission::PermissionPolicy;
    use strata_types::sandbox::{SandboxErrorKind, SandboxRun};
    use crate::tool::ToolError;

    // -------------------------------------------------------------------
    // Doubles
    // -------------------------------------------------------------------

    struct EchoInvoker;

    impl ToolInvoker for EchoInvoker {
        fn invoke<'a>(
            &'a self,
            tool: &'a str,
            args: Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
            Box::pin(async move {
                if tool == "fail:always" {
                    return Err(ToolError::Failed {
                        tool: tool.to_string(),
                        message: "remote failure".to_string(),
                    });
                }
                Ok(json!({ "tool": tool, "args": args }))
            })
        }
    }

    struct FixedSandbox {
        run: SandboxRun,
    }

    impl SandboxSupervisor for FixedSandbox {
        fn execute<'a>(
            &'a self,
            _code: &'a str,
            _context: SandboxContext,
            _tool_defs: &'a [ToolDef],
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = SandboxRun> + Send + 'a>> {
            let run = self.run.clone();
            Box::pin(async move { run })
        }
    }

    fn router_with(sandbox_run: SandboxRun, deny: &[&str]) -> TaskRouter {
        let policy = PermissionPolicy {
            allow: vec!["*".to_string()],
            ask: vec![],
            deny: deny.iter().map(|s| s.to_string()).collect(),
            default: Default::default(),
        };
        TaskRouter::new(
            Arc::new(EchoInvoker),
            Arc::new(FixedSandbox { run: sandbox_run }),
            Arc::new(PermissionResolver::new(policy)),
            vec![ToolDef::named("json:parse")],
            Duration::from_secs(5),
        )
    }

    fn ok_sandbox_run() -> SandboxRun {
        SandboxRun {
            success: true,
            result: Some(json!({"ok": true})),
            error: None,
            execution_time_ms: 3,
            traces: vec![],
            tools_called: vec![],
        }
    }

    fn tool_task(id: &str, tool: &str) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            kind: TaskKind::McpTool,
            tool: Some(tool.to_string()),
            code: None,
            arguments: json!({"x": 1}),
            depends_on: vec![],
            metadata: TaskMetadata::default(),
        }
    }

    fn code_task(id: &str, safe_to_fail: Option<bool>, pure: bool) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            kind: TaskKind::CodeExecution,
            tool: None,
            code: Some("return {ok: true}".to_string()),
            arguments: Value::Null,
            depends_on: vec![],
            metadata: TaskMetadata {
                pure,
                safe_to_fail,
                condition: None,
                extra: Default::default(),
            },
        }
    }

    fn dep_result(id: &str) -> TaskResult {
        let now = Utc::now();
        TaskResult {
            task_id: id.to_string(),
            status: TaskStatus::Success,
            output: Some(json!("upstream output")),
            error: None,
            execution_time_ms: 1,
            started_at: now,
            ended_at: now,
        }
    }

    // -------------------------------------------------------------------
    // Tool dispatch
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn tool_success_produces_success_result() {
        let router = router_with(ok_sandbox_run(), &[]);
        let result = router
            .run(
                &tool_task("t1", "json:parse"),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Success);
        assert!(result.output.is_some());
        assert!(result.error.is_none());
        assert!(result.ended_at >= result.started_at);
    }

    #[tokio::test]
    async fn tool_failure_is_always_fatal() {
        let router = router_with(ok_sandbox_run(), &[]);
        let result = router
            .run(
                &tool_task("t1", "fail:always"),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result.error.as_deref().unwrap().contains("remote failure"));
    }

    #[tokio::test]
    async fn deny_short_circuits_before_invocation() {
        let router = router_with(ok_sandbox_run(), &["shell:exec"]);
        let result = router
            .run(
                &tool_task("t1", "shell:exec"),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("permission-denied"));
    }

    #[tokio::test]
    async fn deps_merge_into_tool_arguments() {
        let router = router_with(ok_sandbox_run(), &[]);
        let mut deps = BTreeMap::new();
        deps.insert("up".to_string(), dep_result("up"));

        let result = router
            .run(
                &tool_task("t1", "json:parse"),
                deps,
                &CancellationToken::new(),
            )
            .await;
        let echoed = result.output.unwrap();
        assert_eq!(echoed["args"]["x"], 1);
        assert_eq!(echoed["args"][DEPS_KEY]["up"], "upstream output");
    }

    // -------------------------------------------------------------------
    // Code dispatch and safe-to-fail
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn code_success_carries_sandbox_result() {
        let router = router_with(ok_sandbox_run(), &[]);
        let result = router
            .run(
                &code_task("c1", None, false),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.output, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn code_failure_fatal_when_not_safe_to_fail() {
        let failed = SandboxRun::failure(SandboxErrorKind::RuntimeError, "boom", 2);
        let router = router_with(failed, &[]);
        let result = router
            .run(
                &code_task("c1", None, false),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("sandbox-runtime"));
    }

    #[tokio::test]
    async fn code_failure_soft_when_safe_to_fail() {
        let failed = SandboxRun::failure(SandboxErrorKind::RuntimeError, "boom", 2);
        let router = router_with(failed, &[]);
        let result = router
            .run(
                &code_task("c1", Some(true), false),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Warning);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn pure_code_task_is_safe_to_fail_by_default() {
        let failed = SandboxRun::failure(SandboxErrorKind::TimeoutError, "killed", 500);
        let router = router_with(failed, &[]);
        let result = router
            .run(
                &code_task("c1", None, true),
                BTreeMap::new(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Warning);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("sandbox-timeout"));
    }

    #[tokio::test]
    async fn cancellation_yields_error_result() {
        let router = router_with(ok_sandbox_run(), &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = router
            .run(&code_task("c1", None, false), BTreeMap::new(), &cancel)
            .await;
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("workflow-abort"));
    }

    // -------------------------------------------------------------------
    // Metadata capabilities
    // -------------------------------------------------------------------

    #[test]
    fn capabilities_parse_from_metadata() {
        let mut task = code_task("c1", None, false);
        task.metadata.extra.insert(
            "capabilities".to_string(),
            json!({"0192f0c1-0000-7000-8000-000000000001": "text:summarize"}),
        );
        let caps = capabilities_from_metadata(&task);
        assert_eq!(
            caps.get("0192f0c1-0000-7000-8000-000000000001").map(String::as_str),
            Some("text:summarize")
        );
    }
}
