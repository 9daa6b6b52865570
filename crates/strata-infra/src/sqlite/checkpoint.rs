//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `strata-core`. Each snapshot is one
//! row in the `checkpoints` table with the workflow state stored as a JSON
//! blob; a single INSERT makes the snapshot atomic -- a concurrent reader
//! sees either the complete state or nothing. Rows are never updated, so
//! checkpoints stay immutable once written.
//!
//! The store's traffic is a checkpoint write per layer boundary and a
//! single read at resume, so it runs on one WAL-mode connection: writes
//! are serialised (SQLite allows only one writer anyway) and survive a
//! crash mid-run.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use strata_core::checkpoint::{CheckpointStore, StoreError};
use strata_types::state::{Checkpoint, WorkflowState};
use uuid::Uuid;

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the checkpoint database at `database_url` and
    /// bring its schema up to date.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // One connection carries the whole checkpoint cadence.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("../../migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Count the snapshots recorded for a DAG run.
    pub async fn count_for_dag(&self, dag_id: &Uuid) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM checkpoints WHERE dag_id = ?1")
            .bind(dag_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let n: i64 = row.try_get("n").map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(n as u64)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<Uuid, StoreError> {
        let checkpoint = Checkpoint::capture(state);
        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|e| StoreError::Io(format!("state serialization failed: {e}")))?;

        sqlx::query(
            "INSERT INTO checkpoints (id, dag_id, state, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.state.dag_id.to_string())
        .bind(state_json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;

        tracing::debug!(
            checkpoint_id = %checkpoint.id,
            dag_id = %checkpoint.state.dag_id,
            layer = checkpoint.state.current_layer,
            "checkpoint saved"
        );

        Ok(checkpoint.id)
    }

    async fn load(&self, checkpoint_id: &Uuid) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query("SELECT state FROM checkpoints WHERE id = ?1")
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String = row
            .try_get("state")
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let state: WorkflowState = serde_json::from_str(&state_json)
            .map_err(|e| StoreError::Io(format!("invalid checkpoint state JSON: {e}")))?;

        Ok(Some(state))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use strata_types::state::{TaskResult, TaskStatus};

    async fn test_store() -> (SqliteCheckpointStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cp.db").display());
        let store = SqliteCheckpointStore::open(&url).await.unwrap();
        (store, dir)
    }

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::new(Uuid::now_v7(), vec![vec![], vec![]]);
        let now = Utc::now();
        state.tasks.push(TaskResult {
            task_id: "t1".to_string(),
            status: TaskStatus::Success,
            output: Some(json!({"parsed": {}})),
            error: None,
            execution_time_ms: 8,
            started_at: now,
            ended_at: now,
        });
        state.current_layer = 1;
        state
    }

    #[tokio::test]
    async fn open_migrates_checkpoint_schema() {
        let (store, _dir) = test_store().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&store.pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["checkpoints"]);
    }

    #[tokio::test]
    async fn open_uses_wal_mode() {
        let (store, _dir) = test_store().await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&store.pool)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn save_then_load_roundtrips_full_state() {
        let (store, _dir) = test_store().await;
        let state = sample_state();

        let id = store.save(&state).await.unwrap();
        let loaded = store.load(&id).await.unwrap().unwrap();

        assert_eq!(loaded.dag_id, state.dag_id);
        assert_eq!(loaded.current_layer, 1);
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].task_id, "t1");
        assert_eq!(loaded.tasks[0].status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (store, _dir) = test_store().await;
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshots_are_immutable_and_independent() {
        let (store, _dir) = test_store().await;
        let mut state = sample_state();

        let first = store.save(&state).await.unwrap();
        state.current_layer = 2;
        let second = store.save(&state).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.load(&first).await.unwrap().unwrap().current_layer, 1);
        assert_eq!(store.load(&second).await.unwrap().unwrap().current_layer, 2);
        assert_eq!(store.count_for_dag(&state.dag_id).await.unwrap(), 2);
    }
}
