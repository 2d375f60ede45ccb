use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Checkpoint, CheckpointStore};
use crate::agent::router::Node;
use crate::agent::state::AgentState;
use crate::errors::CheckpointError;

struct Slot {
    checkpoint: Checkpoint,
    claimed: bool,
}

/// In-process store; claims are atomic per run id through the dashmap shard
/// lock.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        state: &AgentState,
        resume_at: Node,
    ) -> Result<(), CheckpointError> {
        match self.slots.entry(run_id.to_string()) {
            Entry::Occupied(_) => Err(CheckpointError::AlreadyCheckpointed(run_id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    checkpoint: Checkpoint::new(run_id, state, resume_at),
                    claimed: false,
                });
                Ok(())
            }
        }
    }

    async fn load(&self, run_id: &str) -> Result<Checkpoint, CheckpointError> {
        let mut slot = self
            .slots
            .get_mut(run_id)
            .ok_or_else(|| CheckpointError::NoCheckpoint(run_id.to_string()))?;
        if slot.claimed {
            return Err(CheckpointError::AlreadyResuming(run_id.to_string()));
        }
        slot.claimed = true;
        Ok(slot.checkpoint.clone())
    }

    async fn invalidate(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.slots.remove(run_id);
        Ok(())
    }

    async fn release(&self, run_id: &str) -> Result<(), CheckpointError> {
        let mut slot = self
            .slots
            .get_mut(run_id)
            .ok_or_else(|| CheckpointError::NoCheckpoint(run_id.to_string()))?;
        slot.claimed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn state() -> AgentState {
        AgentState::new("run-1", "pytest", PathBuf::from("/tmp"), "m", 5, true)
    }

    #[tokio::test]
    async fn test_save_load_invalidate() {
        let store = MemoryCheckpointStore::new();
        store.save("run-1", &state(), Node::Plan).await.unwrap();

        let cp = store.load("run-1").await.unwrap();
        assert_eq!(cp.resume_at, Node::Plan);
        assert_eq!(cp.state.run_id, "run-1");

        store.invalidate("run-1").await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.load("run-1").await,
            Err(CheckpointError::NoCheckpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_second_load_is_already_resuming() {
        let store = MemoryCheckpointStore::new();
        store.save("run-1", &state(), Node::Plan).await.unwrap();
        store.load("run-1").await.unwrap();
        assert!(matches!(
            store.load("run-1").await,
            Err(CheckpointError::AlreadyResuming(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_save_rejected() {
        let store = MemoryCheckpointStore::new();
        store.save("run-1", &state(), Node::Plan).await.unwrap();
        assert!(matches!(
            store.save("run-1", &state(), Node::Plan).await,
            Err(CheckpointError::AlreadyCheckpointed(_))
        ));
    }

    #[tokio::test]
    async fn test_release_makes_checkpoint_loadable_again() {
        let store = MemoryCheckpointStore::new();
        store.save("run-1", &state(), Node::Plan).await.unwrap();
        store.load("run-1").await.unwrap();
        store.release("run-1").await.unwrap();
        assert!(store.load("run-1").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_claim_exactly_once() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.save("run-1", &state(), Node::Plan).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.load("run-1").await.is_ok() })
            })
            .collect();
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
