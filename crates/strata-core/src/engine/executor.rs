//! The controlled executor: owns the run.
//!
//! Accepts a DAG (and optionally a starting checkpoint), produces a lazy
//! event stream, and terminates by emitting exactly one `workflow_complete`
//! or `workflow_abort`. Layers execute as concurrent task groups on a
//! `JoinSet`, optionally bounded by a semaphore. HIL gates fire before a
//! layer runs, AIL gates after it commits; a checkpoint is taken at every
//! layer boundary unless suppressed.
//!
//! Resume rebuilds the completed-task set from the snapshot and re-applies
//! the decision-gate triggers to every remaining layer -- resumption never
//! bypasses HIL or AIL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use strata_types::config::{
    AilTimeoutAction, ApprovalRequired, DecisionPoints, ExecutorConfig,
};
use strata_types::dag::{Dag, DagError, TaskKind, TaskSpec};
use strata_types::event::EventKind;
use strata_types::permission::PermissionDecision;
use strata_types::state::{RunStatus, TaskResult, TaskStatus, WorkflowState};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, StoreError};
use crate::engine::dag::stratify;
use crate::engine::decision::{AilVerdict, DecisionGate, HilVerdict};
use crate::engine::deps::resolve_dependencies;
use crate::engine::queue::CommandQueue;
use crate::engine::router::TaskRouter;
use crate::event::{channel, EventSink, EventStream, DEFAULT_EVENT_CAPACITY};
use crate::permission::PermissionResolver;

// ---------------------------------------------------------------------------
// RunOutcome / ExecutorError
// ---------------------------------------------------------------------------

/// Typed terminal outcome of a run, returned through the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete {
        successful_tasks: usize,
        failed_tasks: usize,
    },
    Aborted {
        reason: String,
    },
    /// The reviewing agent requested a new DAG. The event stream terminates
    /// with `workflow_abort`; the caller surfaces the requirement upward.
    Replan {
        new_requirement: String,
    },
}

/// Errors raised before the first event, or when joining the run.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    InvalidDag(#[from] DagError),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow-abort: run task failed to join: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// ExecutionHandle
// ---------------------------------------------------------------------------

/// A running workflow: the event stream, the command ingest surface, and
/// the terminal outcome.
#[derive(Debug)]
pub struct ExecutionHandle {
    /// The lazy event sequence; ends after the terminal event.
    pub events: EventStream,
    commands: Arc<CommandQueue>,
    cancel: CancellationToken,
    run: tokio::task::JoinHandle<RunOutcome>,
}

impl ExecutionHandle {
    /// The queue external callers enqueue decision commands into.
    pub fn commands(&self) -> Arc<CommandQueue> {
        Arc::clone(&self.commands)
    }

    /// Cancel the run: pending waits are interrupted and in-flight sandbox
    /// workers are terminated.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to terminate and return its typed outcome.
    pub async fn outcome(self) -> Result<RunOutcome, ExecutorError> {
        self.run.await.map_err(|e| ExecutorError::Join(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ControlledExecutor
// ---------------------------------------------------------------------------

/// The orchestrator. Generic over `S: CheckpointStore` for storage
/// flexibility.
pub struct ControlledExecutor<S: CheckpointStore> {
    config: ExecutorConfig,
    permissions: Arc<PermissionResolver>,
    router: Arc<TaskRouter>,
    store: Arc<S>,
    queue: Arc<CommandQueue>,
    event_capacity: usize,
}

impl<S: CheckpointStore + 'static> ControlledExecutor<S> {
    pub fn new(
        config: ExecutorConfig,
        permissions: Arc<PermissionResolver>,
        router: TaskRouter,
        store: S,
    ) -> Self {
        Self {
            config,
            permissions,
            router: Arc::new(router),
            store: Arc::new(store),
            queue: Arc::new(CommandQueue::new()),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Override the bounded event-channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// The executor-owned command queue (shared with every run it starts).
    pub fn commands(&self) -> Arc<CommandQueue> {
        Arc::clone(&self.queue)
    }

    /// Start a fresh run. Validation and stratification happen here, so
    /// invalid DAGs fail before the first event is emitted.
    pub fn start(&self, dag: &Dag) -> Result<ExecutionHandle, ExecutorError> {
        dag.validate()?;
        let layers = stratify(&dag.tasks)?;
        let state = WorkflowState::new(Uuid::now_v7(), layers);
        Ok(self.spawn_run(state, HashMap::new()))
    }

    /// Resume a run from a checkpoint.
    ///
    /// The completed-task set is rebuilt from the snapshot's results and
    /// layers are recomputed from the supplied DAG; execution begins at the
    /// stored `current_layer`. Tasks already recorded as terminal are not
    /// re-executed, but HIL/AIL triggers apply to every remaining layer as
    /// if this were a fresh run.
    pub async fn resume(
        &self,
        checkpoint_id: Uuid,
        dag: &Dag,
    ) -> Result<ExecutionHandle, ExecutorError> {
        dag.validate()?;
        let layers = stratify(&dag.tasks)?;

        let mut state = self
            .store
            .load(&checkpoint_id)
            .await?
            .ok_or(ExecutorError::CheckpointNotFound(checkpoint_id))?;

        let completed: HashMap<String, TaskResult> = state
            .tasks
            .iter()
            .map(|r| (r.task_id.clone(), r.clone()))
            .collect();

        tracing::info!(
            dag_id = %state.dag_id,
            checkpoint_id = %checkpoint_id,
            resume_layer = state.current_layer,
            skipping = completed.len(),
            "resuming workflow from checkpoint"
        );

        state.layers = layers;
        state.status = RunStatus::Running;
        Ok(self.spawn_run(state, completed))
    }

    fn spawn_run(
        &self,
        state: WorkflowState,
        completed: HashMap<String, TaskResult>,
    ) -> ExecutionHandle {
        let (sink, events) = channel(self.event_capacity);
        let cancel = CancellationToken::new();

        let driver = RunDriver {
            config: self.config.clone(),
            permissions: Arc::clone(&self.permissions),
            router: Arc::clone(&self.router),
            store: Arc::clone(&self.store),
            gate: DecisionGate::new(Arc::clone(&self.queue), sink.clone()),
            sink,
            cancel: cancel.clone(),
        };

        let run = tokio::spawn(driver.drive(state, completed));

        ExecutionHandle {
            events,
            commands: Arc::clone(&self.queue),
            cancel,
            run,
        }
    }
}

// ---------------------------------------------------------------------------
// RunDriver
// ---------------------------------------------------------------------------

struct RunDriver<S> {
    config: ExecutorConfig,
    permissions: Arc<PermissionResolver>,
    router: Arc<TaskRouter>,
    store: Arc<S>,
    gate: DecisionGate,
    sink: EventSink,
    cancel: CancellationToken,
}

impl<S: CheckpointStore + 'static> RunDriver<S> {
    /// Emit an event; a vanished consumer cancels the run so gated
    /// workflows do not keep executing unattended.
    async fn emit(&self, kind: EventKind) {
        if !self.sink.emit(kind).await {
            self.cancel.cancel();
        }
    }

    async fn drive(
        self,
        mut state: WorkflowState,
        mut completed: HashMap<String, TaskResult>,
    ) -> RunOutcome {
        let total_layers = state.layers.len();
        self.emit(EventKind::WorkflowStart { total_layers }).await;

        tracing::info!(
            dag_id = %state.dag_id,
            total_layers,
            start_layer = state.current_layer,
            "starting workflow execution"
        );

        let mut last_checkpoint: Option<Uuid> = None;

        for layer_index in state.current_layer..total_layers {
            if self.cancel.is_cancelled() {
                return self
                    .abort(&mut state, "workflow-abort: run cancelled".to_string())
                    .await;
            }

            let pending: Vec<TaskSpec> = state.layers[layer_index]
                .iter()
                .filter(|t| !completed.contains_key(&t.id))
                .cloned()
                .collect();

            // HIL gate fires before the layer runs.
            if self.hil_required(&pending) {
                state.status = RunStatus::AwaitingDecision;
                let context = approval_context(layer_index, &pending, &self.config);
                let verdict = self
                    .gate
                    .await_approval(
                        context,
                        last_checkpoint,
                        Duration::from_millis(self.config.timeouts.hil_ms),
                    )
                    .await;

                match verdict {
                    HilVerdict::Approved => {
                        state.status = RunStatus::Running;
                    }
                    HilVerdict::Rejected { feedback } => {
                        let mut reason = "hil-rejected: aborted by human".to_string();
                        if let Some(feedback) = feedback {
                            reason.push_str(&format!(" ({feedback})"));
                        }
                        return self.abort(&mut state, reason).await;
                    }
                    HilVerdict::Aborted { reason } => {
                        let reason = format!(
                            "workflow-abort: {}",
                            reason.unwrap_or_else(|| "abort requested".to_string())
                        );
                        return self.abort(&mut state, reason).await;
                    }
                    HilVerdict::TimedOut => {
                        let reason = format!(
                            "hil-timeout: no approval within {}ms",
                            self.config.timeouts.hil_ms
                        );
                        return self.abort(&mut state, reason).await;
                    }
                }
            }

            self.emit(EventKind::LayerStart { layer_index }).await;
            tracing::debug!(
                dag_id = %state.dag_id,
                layer = layer_index,
                tasks = pending.len(),
                "processing layer"
            );

            let mut layer_failed = false;
            self.run_layer(pending, &mut state, &mut completed, &mut layer_failed)
                .await;

            // Commit: bump the layer cursor, publish state, checkpoint.
            state.current_layer = layer_index + 1;
            state.updated_at = Utc::now();
            self.emit(EventKind::StateUpdated {
                state: state.clone(),
            })
            .await;

            if self.config.checkpoints {
                match self.save_checkpoint(&state).await {
                    Some(id) => {
                        last_checkpoint = Some(id);
                        self.emit(EventKind::Checkpoint {
                            checkpoint_id: id,
                            layer_index,
                        })
                        .await;
                    }
                    None => {
                        // Logged inside save_checkpoint; the run continues
                        // without a checkpoint for this layer.
                    }
                }
            }

            // AIL gate fires after the layer commits.
            let has_next = layer_index + 1 < total_layers;
            let ail_fires = self.config.ail.enabled
                && match self.config.ail.decision_points {
                    DecisionPoints::PerLayer => has_next,
                    DecisionPoints::OnError => layer_failed,
                    DecisionPoints::Manual => false,
                };

            if ail_fires {
                state.status = RunStatus::AwaitingDecision;
                let context = review_context(layer_index, layer_failed, &state);
                let verdict = self
                    .gate
                    .await_review(context, Duration::from_millis(self.config.timeouts.ail_ms))
                    .await;

                match verdict {
                    AilVerdict::Continue => {
                        state.status = RunStatus::Running;
                    }
                    AilVerdict::Abort { reason } => {
                        let mut full = "ail-abort: aborted by agent".to_string();
                        if let Some(reason) = reason {
                            full.push_str(&format!(" ({reason})"));
                        }
                        return self.abort(&mut state, full).await;
                    }
                    AilVerdict::Replan { new_requirement } => {
                        let reason =
                            "workflow-abort: replan requested by agent".to_string();
                        self.abort(&mut state, reason).await;
                        return RunOutcome::Replan { new_requirement };
                    }
                    AilVerdict::TimedOut => match self.config.ail.timeout_action {
                        AilTimeoutAction::Abort => {
                            let reason = format!(
                                "ail-timeout: no review within {}ms",
                                self.config.timeouts.ail_ms
                            );
                            return self.abort(&mut state, reason).await;
                        }
                        AilTimeoutAction::Continue => {
                            tracing::warn!(
                                layer = layer_index,
                                "AIL review timed out; continuing per configuration"
                            );
                            state.status = RunStatus::Running;
                        }
                    },
                }
            }
        }

        state.status = RunStatus::Complete;
        let successful_tasks = state.successful_tasks();
        let failed_tasks = state.failed_tasks();
        self.emit(EventKind::WorkflowComplete {
            successful_tasks,
            failed_tasks,
        })
        .await;

        tracing::info!(
            dag_id = %state.dag_id,
            successful_tasks,
            failed_tasks,
            "workflow complete"
        );

        RunOutcome::Complete {
            successful_tasks,
            failed_tasks,
        }
    }

    /// Run one layer's pending tasks concurrently and record their results.
    async fn run_layer(
        &self,
        pending: Vec<TaskSpec>,
        state: &mut WorkflowState,
        completed: &mut HashMap<String, TaskResult>,
        layer_failed: &mut bool,
    ) {
        let semaphore = self
            .config
            .layer_parallelism
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut join_set: JoinSet<TaskResult> = JoinSet::new();

        for task in pending {
            // Condition gate: skip when the declared dependency outcome did
            // not occur.
            if let Some(condition) = &task.metadata.condition {
                if !condition_met(&condition.required_outcome, &task, completed) {
                    let message = format!(
                        "skipped: condition requires dependency outcome '{}'",
                        condition.required_outcome
                    );
                    self.emit(EventKind::TaskStart {
                        task_id: task.id.clone(),
                    })
                    .await;
                    let result = skipped_result(&task, &message);
                    self.emit(EventKind::TaskWarning {
                        task_id: task.id.clone(),
                        message,
                    })
                    .await;
                    record(result, state, completed, layer_failed);
                    continue;
                }
            }

            match resolve_dependencies(&task, completed) {
                Err(err) => {
                    // Dependency failures terminate the task without ever
                    // entering the router.
                    self.emit(EventKind::TaskStart {
                        task_id: task.id.clone(),
                    })
                    .await;
                    let soft = task.kind == TaskKind::CodeExecution
                        && task.metadata.effective_safe_to_fail();
                    let result = dependency_failure_result(&task, err.to_string(), soft);
                    self.emit_terminal(&result).await;
                    record(result, state, completed, layer_failed);
                }
                Ok(deps) => {
                    self.emit(EventKind::TaskStart {
                        task_id: task.id.clone(),
                    })
                    .await;
                    let router = Arc::clone(&self.router);
                    let cancel = self.cancel.clone();
                    let permit_source = semaphore.clone();
                    join_set.spawn(async move {
                        let _permit = match &permit_source {
                            Some(sem) => sem.acquire().await.ok(),
                            None => None,
                        };
                        router.run(&task, deps, &cancel).await
                    });
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    self.emit_terminal(&result).await;
                    record(result, state, completed, layer_failed);
                }
                Err(err) => {
                    tracing::error!(error = %err, "layer task failed to join");
                    *layer_failed = true;
                }
            }
        }
    }

    async fn emit_terminal(&self, result: &TaskResult) {
        let kind = match result.status {
            TaskStatus::Success => EventKind::TaskComplete {
                task_id: result.task_id.clone(),
                result: result.clone(),
            },
            TaskStatus::Warning => EventKind::TaskWarning {
                task_id: result.task_id.clone(),
                message: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "task warning".to_string()),
            },
            TaskStatus::Error => EventKind::TaskError {
                task_id: result.task_id.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string()),
            },
        };
        self.emit(kind).await;
    }

    async fn save_checkpoint(&self, state: &WorkflowState) -> Option<Uuid> {
        let io_timeout = Duration::from_millis(self.config.timeouts.checkpoint_io_ms);
        match tokio::time::timeout(io_timeout, self.store.save(state)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(err)) => {
                tracing::warn!(
                    dag_id = %state.dag_id,
                    layer = state.current_layer,
                    error = %err,
                    "checkpoint save failed; continuing without checkpoint"
                );
                None
            }
            Err(_elapsed) => {
                tracing::warn!(
                    dag_id = %state.dag_id,
                    layer = state.current_layer,
                    timeout_ms = self.config.timeouts.checkpoint_io_ms,
                    "checkpoint save timed out; continuing without checkpoint"
                );
                None
            }
        }
    }

    /// HIL trigger: the gate is enabled and either the policy demands
    /// approval for every layer, or a non-pure task in the upcoming layer
    /// resolves to `ask` (unknown tools resolve to `ask` by default).
    fn hil_required(&self, pending: &[TaskSpec]) -> bool {
        if !self.config.hil.enabled || pending.is_empty() {
            return false;
        }
        if self.config.hil.approval_required == ApprovalRequired::Always {
            return true;
        }
        pending.iter().any(|task| {
            !task.metadata.pure
                && task
                    .tool
                    .as_deref()
                    .is_some_and(|tool| self.permissions.resolve(tool) == PermissionDecision::Ask)
        })
    }

    async fn abort(&self, state: &mut WorkflowState, reason: String) -> RunOutcome {
        state.status = RunStatus::Aborted;
        self.cancel.cancel();
        tracing::warn!(dag_id = %state.dag_id, reason = reason.as_str(), "workflow aborted");
        self.sink
            .emit(EventKind::WorkflowAbort {
                reason: reason.clone(),
            })
            .await;
        RunOutcome::Aborted { reason }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record(
    result: TaskResult,
    state: &mut WorkflowState,
    completed: &mut HashMap<String, TaskResult>,
    layer_failed: &mut bool,
) {
    if result.is_failure() {
        *layer_failed = true;
    }
    completed.insert(result.task_id.clone(), result.clone());
    state.tasks.push(result);
}

fn condition_met(
    required_outcome: &str,
    task: &TaskSpec,
    completed: &HashMap<String, TaskResult>,
) -> bool {
    let required = match required_outcome {
        "success" => TaskStatus::Success,
        "warning" => TaskStatus::Warning,
        "error" => TaskStatus::Error,
        other => {
            tracing::warn!(
                task_id = task.id.as_str(),
                required_outcome = other,
                "unknown required outcome; condition treated as unmet"
            );
            return false;
        }
    };
    task.depends_on.iter().all(|dep| {
        completed
            .get(dep)
            .is_some_and(|result| result.status == required)
    })
}

fn skipped_result(task: &TaskSpec, message: &str) -> TaskResult {
    let now = Utc::now();
    TaskResult {
        task_id: task.id.clone(),
        status: TaskStatus::Warning,
        output: Some(json!({ "skipped": true, "reason": message })),
        error: None,
        execution_time_ms: 0,
        started_at: now,
        ended_at: now,
    }
}

fn dependency_failure_result(task: &TaskSpec, error: String, soft: bool) -> TaskResult {
    let now = Utc::now();
    TaskResult {
        task_id: task.id.clone(),
        status: if soft {
            TaskStatus::Warning
        } else {
            TaskStatus::Error
        },
        output: None,
        error: Some(error),
        execution_time_ms: 0,
        started_at: now,
        ended_at: now,
    }
}

fn approval_context(
    layer_index: usize,
    pending: &[TaskSpec],
    config: &ExecutorConfig,
) -> serde_json::Value {
    let reason = if config.hil.approval_required == ApprovalRequired::Always {
        "approval required for every layer"
    } else {
        "layer contains tools requiring approval"
    };
    json!({
        "layer_index": layer_index,
        "tasks": pending.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        "reason": reason,
    })
}

fn review_context(
    layer_index: usize,
    layer_failed: bool,
    state: &WorkflowState,
) -> serde_json::Value {
    json!({
        "layer_index": layer_index,
        "layer_failed": layer_failed,
        "successful_tasks": state.successful_tasks(),
        "failed_tasks": state.failed_tasks(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
