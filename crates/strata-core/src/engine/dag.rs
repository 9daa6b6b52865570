//! DAG stratification: cycle detection and parallel layer computation.
//!
//! Uses `petgraph` to model task dependencies as a directed graph.
//! Topological sort detects cycles, and depth-based grouping produces
//! execution layers where all tasks in a layer can run concurrently.
//! The partition is deterministic: within a layer, tasks keep the
//! declaration order of the input DAG.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use strata_types::dag::{DagError, TaskSpec};

/// Stratify tasks into parallel execution layers (Kahn-style).
///
/// Each layer contains tasks whose dependencies are all satisfied by prior
/// layers. The algorithm:
///
/// 1. Build a `DiGraph` with task IDs as nodes and `depends_on` edges.
/// 2. Run `petgraph::algo::toposort` to verify acyclicity.
/// 3. Compute each node's depth (max dependency depth + 1).
/// 4. Group tasks by depth, preserving declaration order within a layer.
pub fn stratify(tasks: &[TaskSpec]) -> Result<Vec<Vec<TaskSpec>>, DagError> {
    if tasks.is_empty() {
        return Ok(vec![]);
    }

    let id_to_task: HashMap<&str, &TaskSpec> =
        tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let id_to_idx: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    // Edge direction: dependency -> dependent
    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = tasks.iter().map(|t| graph.add_node(t.id.as_str())).collect();

    for task in tasks {
        let to_idx = id_to_idx[task.id.as_str()];
        for dep in &task.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                DagError::UnknownDependency {
                    task_id: task.id.clone(),
                    dep_id: dep.clone(),
                }
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let task_id = graph[cycle.node_id()];
        DagError::CycleDetected(task_id.to_string())
    })?;

    // Depth of each node: roots are 0, everything else max(dep depth) + 1.
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &node_idx in &sorted {
        let task_id = graph[node_idx];
        let task = id_to_task[task_id];
        let depth = task
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(task_id, depth);
    }

    // Group by depth; iterating `tasks` keeps declaration order per layer.
    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<TaskSpec>> = vec![vec![]; max_depth + 1];
    for task in tasks {
        layers[depths[task.id.as_str()]].push(task.clone());
    }

    Ok(layers)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::dag::{TaskKind, TaskMetadata};

    fn task(id: &str, deps: Vec<&str>) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            kind: TaskKind::McpTool,
            tool: Some("json:parse".to_string()),
            code: None,
            arguments: serde_json::Value::Null,
            depends_on: deps.into_iter().map(String::from).collect(),
            metadata: TaskMetadata::default(),
        }
    }

    #[test]
    fn independent_tasks_form_single_layer() {
        let layers = stratify(&[task("a", vec![]), task("b", vec![]), task("c", vec![])])
            .unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 3);
    }

    #[test]
    fn linear_chain_one_layer_per_task() {
        let layers = stratify(&[
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec!["b"]),
        ])
        .unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1][0].id, "b");
    }

    #[test]
    fn diamond_yields_three_layers() {
        let layers = stratify(&[
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec!["a"]),
            task("d", vec!["b", "c"]),
        ])
        .unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].len(), 2);
        assert_eq!(layers[2][0].id, "d");
    }

    #[test]
    fn declaration_order_preserved_within_layer() {
        let layers = stratify(&[
            task("zeta", vec![]),
            task("alpha", vec![]),
            task("mid", vec![]),
        ])
        .unwrap();
        let ids: Vec<&str> = layers[0].iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn partition_is_deterministic_across_runs() {
        let tasks = vec![
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec![]),
            task("d", vec!["b", "c"]),
            task("e", vec!["a"]),
        ];
        let first = stratify(&tasks).unwrap();
        let second = stratify(&tasks).unwrap();
        let shape =
            |layers: &[Vec<TaskSpec>]| -> Vec<Vec<String>> {
                layers
                    .iter()
                    .map(|l| l.iter().map(|t| t.id.clone()).collect())
                    .collect()
            };
        assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = stratify(&[task("a", vec!["b"]), task("b", vec!["a"])]).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn empty_dag_yields_no_layers() {
        assert!(stratify(&[]).unwrap().is_empty());
    }
}
