//! Execution tracking types: task results, workflow state, checkpoints.
//!
//! A [`WorkflowState`] is exclusively owned by the executor for the duration
//! of one run and cloned into a [`Checkpoint`] at layer boundaries. Task
//! results are owned by the state; there is exactly one entry per task that
//! has started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dag::TaskSpec;

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Terminal status of a single task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    Warning,
}

/// Result of one task execution.
///
/// Exactly one of `output` or `error` is set for terminal statuses. A
/// safe-to-fail failure carries `status = Warning` with `error` set, so
/// downstream dependency resolution still observes the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl TaskResult {
    /// Whether this result counts as a failure for dependency propagation.
    ///
    /// Covers both fatal errors and safe-to-fail warnings that carry an
    /// error; a warning without an error (a skipped task) is not a failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingDecision,
    Aborted,
    Complete,
}

/// The full execution state of one workflow run.
///
/// `current_layer` is the index of the next layer to execute; it is
/// incremented after each layer fully resolves, immediately before a
/// checkpoint may be taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Run-scoped DAG identifier (UUIDv7, assigned at start).
    pub dag_id: Uuid,
    /// Index of the next layer to execute.
    pub current_layer: usize,
    /// The stratified execution plan.
    pub layers: Vec<Vec<TaskSpec>>,
    /// One entry per already-started task.
    pub tasks: Vec<TaskResult>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl WorkflowState {
    /// Create a fresh running state over a stratified plan.
    pub fn new(dag_id: Uuid, layers: Vec<Vec<TaskSpec>>) -> Self {
        let now = Utc::now();
        Self {
            dag_id,
            current_layer: 0,
            layers,
            tasks: Vec::new(),
            started_at: now,
            updated_at: now,
            status: RunStatus::Running,
        }
    }

    /// Count of tasks that terminated successfully.
    pub fn successful_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|r| r.status == TaskStatus::Success)
            .count()
    }

    /// Count of tasks that terminated with an error set (fatal or
    /// safe-to-fail).
    pub fn failed_tasks(&self) -> usize {
        self.tasks.iter().filter(|r| r.is_failure()).count()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// A persisted snapshot of a [`WorkflowState`], immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: Uuid,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot the given state under a fresh UUIDv7 id.
    pub fn capture(state: &WorkflowState) -> Self {
        Self {
            id: Uuid::now_v7(),
            state: state.clone(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
