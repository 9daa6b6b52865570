//! Task DAG domain types and wire-level input format.
//!
//! A [`Dag`] is the engine's sole input: an ordered list of [`TaskSpec`]s
//! whose `depends_on` references form a directed acyclic graph. The wire
//! format is camelCase JSON (`{"tasks":[{"id":..,"type":"mcp_tool",..,
//! "dependsOn":[..]}]}`). Structural validation lives here; cycle detection
//! happens at stratification time in the core crate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// A single task in the execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Task ID, unique within the DAG.
    pub id: String,
    /// The kind of task.
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Tool identifier (`server:name`) for tool-invoking tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Code snippet for `code_execution` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Argument payload passed to the tool or sandbox.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    /// Task IDs this task depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Execution metadata (purity, safe-to-fail policy, run condition).
    #[serde(default)]
    pub metadata: TaskMetadata,
}

/// The kind of task in a DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Invoke an externally-hosted MCP tool.
    McpTool,
    /// Run a code snippet in the sandbox supervisor.
    CodeExecution,
    /// Unspecialised task; routed like a tool invocation.
    Default,
}

// ---------------------------------------------------------------------------
// TaskMetadata
// ---------------------------------------------------------------------------

/// Per-task execution metadata.
///
/// Unknown keys are preserved in `extra` for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    /// Pure tasks have no side effects; they never trigger approval gates
    /// and are safe-to-fail by default.
    #[serde(default)]
    pub pure: bool,
    /// Explicit safe-to-fail override. When absent, purity decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_to_fail: Option<bool>,
    /// Run condition against dependency outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TaskCondition>,
    /// Unrecognised metadata keys, carried through untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TaskMetadata {
    /// Effective safe-to-fail policy: the explicit flag when present,
    /// otherwise derived from purity.
    pub fn effective_safe_to_fail(&self) -> bool {
        self.safe_to_fail.unwrap_or(self.pure)
    }
}

/// Conditional execution gate: the task runs only when every dependency
/// terminated with the required outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCondition {
    /// Required dependency status: `success`, `warning`, or `error`.
    pub required_outcome: String,
}

// ---------------------------------------------------------------------------
// Dag
// ---------------------------------------------------------------------------

/// The engine's input: an ordered list of tasks forming a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub tasks: Vec<TaskSpec>,
}

impl Dag {
    /// Parse a DAG from its wire-level JSON representation.
    pub fn from_json(raw: &str) -> Result<Self, DagError> {
        let dag: Dag = serde_json::from_str(raw)
            .map_err(|e| DagError::Malformed(e.to_string()))?;
        dag.validate()?;
        Ok(dag)
    }

    /// Structural validation: unique IDs, resolvable dependency references,
    /// code tasks carry code, tool tasks carry a tool identifier.
    ///
    /// Acyclicity is checked when the DAG is stratified into layers.
    pub fn validate(&self) -> Result<(), DagError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if task.id.is_empty() {
                return Err(DagError::EmptyTaskId);
            }
            if !seen.insert(task.id.as_str()) {
                return Err(DagError::DuplicateTaskId(task.id.clone()));
            }
        }

        let ids: HashMap<&str, &TaskSpec> =
            self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains_key(dep.as_str()) {
                    return Err(DagError::UnknownDependency {
                        task_id: task.id.clone(),
                        dep_id: dep.clone(),
                    });
                }
            }

            match task.kind {
                TaskKind::CodeExecution => {
                    if task.code.as_deref().unwrap_or("").is_empty() {
                        return Err(DagError::MissingCode(task.id.clone()));
                    }
                }
                TaskKind::McpTool => {
                    if task.tool.as_deref().unwrap_or("").is_empty() {
                        return Err(DagError::MissingTool(task.id.clone()));
                    }
                }
                TaskKind::Default => {}
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DagError
// ---------------------------------------------------------------------------

/// Structural DAG validation errors. These prevent a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// The input is not valid DAG JSON.
    #[error("invalid-dag: malformed input: {0}")]
    Malformed(String),

    /// A task has an empty ID.
    #[error("invalid-dag: task with empty id")]
    EmptyTaskId,

    /// Two tasks share the same ID.
    #[error("invalid-dag: duplicate task id '{0}'")]
    DuplicateTaskId(String),

    /// A dependency reference does not resolve inside the DAG.
    #[error("invalid-dag: task '{task_id}' depends on unknown task '{dep_id}'")]
    UnknownDependency { task_id: String, dep_id: String },

    /// A code task carries no code.
    #[error("invalid-dag: code task '{0}' has no code")]
    MissingCode(String),

    /// A tool task carries no tool identifier.
    #[error("invalid-dag: tool task '{0}' has no tool")]
    MissingTool(String),

    /// The dependency graph contains a cycle.
    #[error("invalid-dag: cycle detected involving task '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
