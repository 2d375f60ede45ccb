//! Durable resumption points for suspended runs.
//!
//! A checkpoint moves through three states: *live* after `save`, *claimed*
//! after a successful `load`, and gone after `invalidate`. `load` is the
//! atomic claim: of two concurrent resumes exactly one gets the state, the
//! other gets [`CheckpointError::AlreadyResuming`].

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::router::Node;
use crate::agent::state::AgentState;
use crate::errors::CheckpointError;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub state: AgentState,
    pub resume_at: Node,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: &str, state: &AgentState, resume_at: Node) -> Self {
        Self {
            run_id: run_id.to_string(),
            state: state.clone(),
            resume_at,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a live checkpoint. Fails with `AlreadyCheckpointed` if one
    /// already exists for the run (live or claimed).
    async fn save(
        &self,
        run_id: &str,
        state: &AgentState,
        resume_at: Node,
    ) -> Result<(), CheckpointError>;

    /// Claim the live checkpoint and return it.
    async fn load(&self, run_id: &str) -> Result<Checkpoint, CheckpointError>;

    /// Remove the checkpoint in whatever state it is. Idempotent.
    async fn invalidate(&self, run_id: &str) -> Result<(), CheckpointError>;

    /// Return a claimed checkpoint to live, for a resume that could not
    /// proceed after claiming.
    async fn release(&self, run_id: &str) -> Result<(), CheckpointError>;
}
