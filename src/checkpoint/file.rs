use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::debug;

use super::{Checkpoint, CheckpointStore};
use crate::agent::router::Node;
use crate::agent::state::AgentState;
use crate::errors::CheckpointError;

/// One JSON document per run under `dir`.
///
/// Live checkpoints are `<run_id>.json`; a claim renames the file to
/// `<run_id>.claimed`, which the filesystem performs atomically, so only
/// one concurrent `load` can succeed.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", dir.display()))
            .map_err(CheckpointError::Storage)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, run_id: &str) -> Result<(PathBuf, PathBuf), CheckpointError> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::Storage(anyhow!(
                "run id {:?} is not usable as a file name",
                run_id
            )));
        }
        Ok((
            self.dir.join(format!("{}.json", run_id)),
            self.dir.join(format!("{}.claimed", run_id)),
        ))
    }
}

fn storage<E: Into<anyhow::Error>>(e: E) -> CheckpointError {
    CheckpointError::Storage(e.into())
}

async fn remove_if_exists(path: &Path) -> Result<(), CheckpointError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage(e)),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        state: &AgentState,
        resume_at: Node,
    ) -> Result<(), CheckpointError> {
        let (live, claimed) = self.paths(run_id)?;
        if tokio::fs::try_exists(&claimed).await.map_err(storage)? {
            return Err(CheckpointError::AlreadyCheckpointed(run_id.to_string()));
        }

        let body = serde_json::to_vec_pretty(&Checkpoint::new(run_id, state, resume_at))
            .map_err(storage)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", run_id, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, body).await.map_err(storage)?;

        // hard_link fails if the target exists, giving create-if-absent
        let linked = tokio::fs::hard_link(&tmp, &live).await;
        remove_if_exists(&tmp).await?;
        match linked {
            Ok(()) => {
                debug!(run_id, path = %live.display(), "Checkpoint saved");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(CheckpointError::AlreadyCheckpointed(run_id.to_string()))
            }
            Err(e) => Err(storage(e)),
        }
    }

    async fn load(&self, run_id: &str) -> Result<Checkpoint, CheckpointError> {
        let (live, claimed) = self.paths(run_id)?;
        if let Err(e) = tokio::fs::rename(&live, &claimed).await {
            if e.kind() != ErrorKind::NotFound {
                return Err(storage(e));
            }
            return if tokio::fs::try_exists(&claimed).await.map_err(storage)? {
                Err(CheckpointError::AlreadyResuming(run_id.to_string()))
            } else {
                Err(CheckpointError::NoCheckpoint(run_id.to_string()))
            };
        }

        let body = tokio::fs::read(&claimed).await.map_err(storage)?;
        serde_json::from_slice(&body)
            .with_context(|| format!("Corrupt checkpoint {}", claimed.display()))
            .map_err(CheckpointError::Storage)
    }

    async fn invalidate(&self, run_id: &str) -> Result<(), CheckpointError> {
        let (live, claimed) = self.paths(run_id)?;
        remove_if_exists(&claimed).await?;
        remove_if_exists(&live).await
    }

    async fn release(&self, run_id: &str) -> Result<(), CheckpointError> {
        let (live, claimed) = self.paths(run_id)?;
        match tokio::fs::rename(&claimed, &live).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CheckpointError::NoCheckpoint(run_id.to_string()))
            }
            Err(e) => Err(storage(e)),
        }
    }
}
