//! Durable per-stage snapshots of run state.
//!
//! There is at most one checkpoint per `(run_id, stage_id)`; saving again
//! replaces it. Each save also gets a per-run sequence number, which is how
//! re-executed upstream stages supersede stale downstream checkpoints: a
//! checkpoint is *current* only if its sequence is greater than that of every
//! checkpoint with a lower ordinal. The latest completed stage is the current
//! checkpoint with the highest ordinal.

mod memory;
mod sqlite;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::state::RunState;
use crate::utils::Timestamp;

/// Error type for checkpoint operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    /// The state could not be encoded or decoded.
    #[error("checkpoint serialization: {0}")]
    Serialization(String),
    /// The storage medium failed.
    #[error("checkpoint storage: {0}")]
    Storage(String),
    /// The requested checkpoint does not exist.
    #[error("checkpoint not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run identifier.
    pub run_id: String,
    /// The completed stage.
    pub stage_id: String,
    /// Topological position of the stage.
    pub ordinal: usize,
    /// Per-run save sequence.
    pub sequence: u64,
    /// When the checkpoint was saved.
    pub saved_at: Timestamp,
    /// The state after the stage's writes were applied.
    pub state: RunState,
}

/// Checkpoint metadata without the state payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// The completed stage.
    pub stage_id: String,
    /// Topological position of the stage.
    pub ordinal: usize,
    /// Per-run save sequence.
    pub sequence: u64,
    /// When the checkpoint was saved.
    pub saved_at: Timestamp,
    /// False if a later re-execution of an upstream stage superseded it.
    #[serde(default)]
    pub current: bool,
}

/// Sorts checkpoints by ordinal and marks which ones are current.
#[must_use]
pub fn mark_current(mut infos: Vec<CheckpointInfo>) -> Vec<CheckpointInfo> {
    infos.sort_by(|a, b| {
        a.ordinal
            .cmp(&b.ordinal)
            .then_with(|| a.stage_id.cmp(&b.stage_id))
    });

    let mut highest_below = 0u64;
    let mut i = 0;
    while i < infos.len() {
        // Checkpoints sharing an ordinal are compared only against lower ordinals.
        let ordinal = infos[i].ordinal;
        let mut j = i;
        let mut highest_here = highest_below;
        while j < infos.len() && infos[j].ordinal == ordinal {
            infos[j].current = infos[j].sequence > highest_below;
            highest_here = highest_here.max(infos[j].sequence);
            j += 1;
        }
        highest_below = highest_here;
        i = j;
    }
    infos
}

/// Returns the current checkpoint with the highest ordinal.
#[must_use]
pub fn select_latest(infos: &[CheckpointInfo]) -> Option<&CheckpointInfo> {
    infos
        .iter()
        .filter(|c| c.current)
        .max_by(|a, b| a.ordinal.cmp(&b.ordinal).then(a.sequence.cmp(&b.sequence)))
}

/// Persists and restores run state keyed by `(run_id, stage_id)`.
///
/// `save` must be atomic with respect to crashes: after it returns, the
/// checkpoint survives a process exit; if it fails, the previous checkpoint
/// for that key is intact. Distinct run ids may be used concurrently.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Saves the state reached after `stage_id` completed.
    async fn save(
        &self,
        run_id: &str,
        stage_id: &str,
        ordinal: usize,
        state: &RunState,
    ) -> Result<CheckpointInfo, CheckpointError>;

    /// Loads the state saved for `(run_id, stage_id)`.
    async fn load(&self, run_id: &str, stage_id: &str) -> Result<Option<RunState>, CheckpointError>;

    /// Returns every checkpoint of a run, in any order, `current` unset.
    async fn entries(&self, run_id: &str) -> Result<Vec<CheckpointInfo>, CheckpointError>;

    /// Returns every known run id, sorted.
    async fn runs(&self) -> Result<Vec<String>, CheckpointError>;

    /// Returns a run's checkpoints in ordinal order with `current` resolved.
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        Ok(mark_current(self.entries(run_id).await?))
    }

    /// Returns the furthest stage completed in the run's current lineage.
    async fn latest_completed_stage(&self, run_id: &str) -> Result<Option<String>, CheckpointError> {
        let infos = self.list(run_id).await?;
        Ok(select_latest(&infos).map(|c| c.stage_id.clone()))
    }

    /// Loads the checkpoint of the latest completed stage.
    async fn latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let infos = self.list(run_id).await?;
        let Some(info) = select_latest(&infos) else {
            return Ok(None);
        };
        let state = self
            .load(run_id, &info.stage_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(format!("{run_id}/{}", info.stage_id)))?;
        Ok(Some(Checkpoint {
            run_id: run_id.to_string(),
            stage_id: info.stage_id.clone(),
            ordinal: info.ordinal,
            sequence: info.sequence,
            saved_at: info.saved_at,
            state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now;

    fn info(stage: &str, ordinal: usize, sequence: u64) -> CheckpointInfo {
        CheckpointInfo {
            stage_id: stage.to_string(),
            ordinal,
            sequence,
            saved_at: now(),
            current: false,
        }
    }

    #[test]
    fn test_linear_lineage_all_current() {
        let infos = mark_current(vec![info("c", 2, 3), info("a", 0, 1), info("b", 1, 2)]);
        assert!(infos.iter().all(|c| c.current));
        assert_eq!(select_latest(&infos).unwrap().stage_id, "c");
    }

    #[test]
    fn test_reexecuted_upstream_supersedes_downstream() {
        // a, b, c, d ran; then b was re-run from its predecessor.
        let infos = mark_current(vec![
            info("a", 0, 1),
            info("b", 1, 5),
            info("c", 2, 3),
            info("d", 3, 4),
        ]);
        let current: Vec<_> = infos.iter().filter(|c| c.current).map(|c| c.stage_id.as_str()).collect();
        assert_eq!(current, vec!["a", "b"]);
        assert_eq!(select_latest(&infos).unwrap().stage_id, "b");
    }

    #[test]
    fn test_reexecution_then_progress() {
        let infos = mark_current(vec![
            info("a", 0, 1),
            info("b", 1, 5),
            info("c", 2, 6),
            info("d", 3, 4),
        ]);
        assert_eq!(select_latest(&infos).unwrap().stage_id, "c");
        assert!(!infos[3].current);
    }

    #[test]
    fn test_skipped_branch_keeps_order() {
        // critique (ordinal 3) never ran; plan (4) follows synthesize (2).
        let infos = mark_current(vec![info("synthesize", 2, 3), info("plan", 4, 4)]);
        assert_eq!(select_latest(&infos).unwrap().stage_id, "plan");
    }

    #[test]
    fn test_empty() {
        assert!(select_latest(&mark_current(Vec::new())).is_none());
    }
}
