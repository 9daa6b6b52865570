//! Checkpoint persistence port and the in-memory store.
//!
//! Snapshots are immutable once written: `save` persists the full state
//! atomically under a fresh UUIDv7 and `load` either returns the complete
//! snapshot or nothing. The executor checkpoints after every fully-resolved
//! layer unless the configuration suppresses it.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::time::Duration;

use dashmap::DashMap;
use strata_types::state::{Checkpoint, WorkflowState};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Checkpoint store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O or query failure.
    #[error("checkpoint-io: {0}")]
    Io(String),

    /// The store did not answer within the configured I/O timeout.
    #[error("checkpoint-io: store timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Durable persistence for workflow state snapshots.
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot of `state` atomically; returns the checkpoint id.
    fn save(
        &self,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    /// Load a snapshot by id. `Ok(None)` when the id is unknown.
    fn load(
        &self,
        checkpoint_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowState>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-memory checkpoint store for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: DashMap<Uuid, Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<Uuid, StoreError> {
        let checkpoint = Checkpoint::capture(state);
        let id = checkpoint.id;
        self.snapshots.insert(id, checkpoint);
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &Uuid) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .snapshots
            .get(checkpoint_id)
            .map(|entry| entry.state.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = MemoryCheckpointStore::new();
        let state = WorkflowState::new(Uuid::now_v7(), vec![vec![], vec![]]);

        let id = store.save(&state).await.unwrap();
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.dag_id, state.dag_id);
        assert_eq!(loaded.layers.len(), 2);
    }

    #[tokio::test]
    async fn unknown_id_loads_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshots_are_independent() {
        let store = MemoryCheckpointStore::new();
        let mut state = WorkflowState::new(Uuid::now_v7(), vec![]);

        let first = store.save(&state).await.unwrap();
        state.current_layer = 3;
        let second = store.save(&state).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.load(&first).await.unwrap().unwrap().current_layer, 0);
        assert_eq!(store.load(&second).await.unwrap().unwrap().current_layer, 3);
    }
}
