//! Dependency payload resolution and error propagation.
//!
//! Before a task runs, its declared dependencies are looked up in the map of
//! completed results. A missing entry or an upstream failure fails the task
//! fast, with the upstream task id embedded in the error. Condition-gated
//! tasks opt out of failure propagation -- they declared which dependency
//! outcome they want and inspect the raw results themselves.

use std::collections::{BTreeMap, HashMap};

use strata_types::dag::TaskSpec;
use strata_types::state::TaskResult;

// ---------------------------------------------------------------------------
// DependencyError
// ---------------------------------------------------------------------------

/// Why a task's dependencies could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    /// A declared dependency has no recorded result.
    #[error("missing-dependency: task '{task_id}' requires '{dep_id}' which has not completed")]
    Missing { task_id: String, dep_id: String },

    /// A declared dependency terminated with an error.
    #[error("dependency-failed: task '{task_id}' depends on failed task '{dep_id}'")]
    Failed { task_id: String, dep_id: String },
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a task's dependency payload from the completed-task map.
///
/// For code tasks the resolved map is injected into the sandbox context
/// under the `deps` key; for tool tasks it is merged into the argument
/// payload under the same key. The returned map is ordered for
/// deterministic payloads.
pub fn resolve_dependencies(
    task: &TaskSpec,
    completed: &HashMap<String, TaskResult>,
) -> Result<BTreeMap<String, TaskResult>, DependencyError> {
    // A condition gate means the task inspects dependency outcomes itself;
    // failure propagation is bypassed (error-handler tasks depend on
    // failures by design of their condition).
    let propagate_failures = task.metadata.condition.is_none();

    let mut resolved = BTreeMap::new();
    for dep_id in &task.depends_on {
        let result = completed.get(dep_id).ok_or_else(|| DependencyError::Missing {
            task_id: task.id.clone(),
            dep_id: dep_id.clone(),
        })?;

        if propagate_failures && result.is_failure() {
            return Err(DependencyError::Failed {
                task_id: task.id.clone(),
                dep_id: dep_id.clone(),
            });
        }

        resolved.insert(dep_id.clone(), result.clone());
    }

    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
