//! Durable run checkpoints
//!
//! The supervisor writes the shared state and its graph position after every
//! node transition. A suspended run can be resumed from its checkpoint by
//! any process that can reach the same store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::interrupt::InterruptPayload;
use crate::orchestrator::file_key;
use crate::pipeline::TeamContinuation;
use crate::state::{now_rfc3339, SharedState, TeamState};

/// Where the supervisor graph stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum GraphPosition {
    Planning,
    Orchestrating,
    /// About to run the plan layer with this index
    Teams { layer: usize },
    Aggregating,
    Finished,
    /// Parked inside a team waiting for a resume command
    Suspended {
        team: String,
        layer: usize,
        continuation: TeamContinuation,
        /// Stage progress of the parked team
        progress: TeamState,
    },
}

impl GraphPosition {
    pub fn is_suspended(&self) -> bool {
        matches!(self, GraphPosition::Suspended { .. })
    }
}

/// Everything needed to continue a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub session_id: String,
    pub state: SharedState,
    pub position: GraphPosition,
    pub pending_interrupt: Option<InterruptPayload>,
    pub updated_at: String,
}

impl PersistedCheckpoint {
    pub fn new(state: SharedState, position: GraphPosition, pending_interrupt: Option<InterruptPayload>) -> Self {
        Self {
            session_id: state.session_id.clone(),
            state,
            position,
            pending_interrupt,
            updated_at: now_rfc3339(),
        }
    }
}

/// Checkpoint persistence keyed by session id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the checkpoint for its session
    async fn put(&self, checkpoint: &PersistedCheckpoint) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<PersistedCheckpoint>>;

    /// Returns whether a checkpoint existed
    async fn delete(&self, session_id: &str) -> Result<bool>;
}

/// Checkpoints held in memory, lost on restart
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: parking_lot::Mutex<HashMap<String, PersistedCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: &PersistedCheckpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<PersistedCheckpoint>> {
        Ok(self.checkpoints.lock().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.checkpoints.lock().remove(session_id).is_some())
    }
}

/// Checkpoints persisted as one JSON file per session
///
/// The directory will be created if it doesn't exist when saving.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_key(session_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &PersistedCheckpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.session_id);
        let content = serde_json::to_string_pretty(checkpoint)?;
        // replace atomically
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::debug!("Saved checkpoint '{}' to {:?}", checkpoint.session_id, path);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<PersistedCheckpoint>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str::<PersistedCheckpoint>(&content) {
            Ok(checkpoint) if checkpoint.session_id != session_id => {
                log::warn!(
                    "Checkpoint at {:?} belongs to session '{}', not '{}'",
                    path,
                    checkpoint.session_id,
                    session_id
                );
                Ok(None)
            }
            Ok(checkpoint) => {
                log::info!("Loaded checkpoint '{}' from {:?}", session_id, path);
                Ok(Some(checkpoint))
            }
            Err(e) => {
                log::warn!("Failed to parse checkpoint from {:?}: {}", path, e);
                Err(EngineError::Checkpoint(format!("{}: {}", path.display(), e)))
            }
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        log::debug!("Deleted checkpoint '{}' from {:?}", session_id, path);
        Ok(true)
    }
}
