//! Execution events emitted by the engine.
//!
//! The event stream is an ordered sequence of JSON objects, one per event,
//! each tagged by `type` and carrying an epoch-millis `timestamp` that is
//! monotonically non-decreasing across the stream. The stream starts with
//! `workflow_start` and terminates exactly once with `workflow_complete` or
//! `workflow_abort`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::{TaskResult, WorkflowState};

// ---------------------------------------------------------------------------
// ExecutionEvent
// ---------------------------------------------------------------------------

/// One event in the engine's output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Epoch milliseconds, monotonically non-decreasing across the stream.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The event vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    /// The run has started; the layer count is known up front.
    WorkflowStart { total_layers: usize },

    /// A layer is about to execute.
    LayerStart { layer_index: usize },

    /// A task has been dispatched.
    TaskStart { task_id: String },

    /// A task terminated successfully.
    TaskComplete { task_id: String, result: TaskResult },

    /// A task terminated with a fatal error.
    TaskError { task_id: String, error: String },

    /// A safe-to-fail task failed, or a conditional task was skipped.
    TaskWarning { task_id: String, message: String },

    /// The workflow state after a layer fully resolved.
    StateUpdated { state: WorkflowState },

    /// A checkpoint was persisted for the given layer.
    Checkpoint {
        checkpoint_id: Uuid,
        layer_index: usize,
    },

    /// A decision gate is waiting for an external command.
    DecisionRequired {
        decision_type: DecisionType,
        context: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint_id: Option<Uuid>,
    },

    /// Terminal: the run finished.
    WorkflowComplete {
        successful_tasks: usize,
        failed_tasks: usize,
    },

    /// Terminal: the run was aborted.
    WorkflowAbort { reason: String },
}

/// Which decision loop raised a `decision_required` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionType {
    Hil,
    Ail,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
