//! In-memory checkpoint store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::{CheckpointError, CheckpointInfo, CheckpointStore};
use crate::state::RunState;
use crate::utils::{now, Timestamp};

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    ordinal: usize,
    sequence: u64,
    saved_at: Timestamp,
    state: Vec<u8>,
}

/// Checkpoint store kept in process memory.
///
/// States are stored serialized, so a loaded state is always a fresh copy.
/// Suitable for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    runs: DashMap<String, BTreeMap<String, StoredCheckpoint>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of checkpoints stored for a run.
    #[must_use]
    pub fn count(&self, run_id: &str) -> usize {
        self.runs.get(run_id).map_or(0, |r| r.len())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        stage_id: &str,
        ordinal: usize,
        state: &RunState,
    ) -> Result<CheckpointInfo, CheckpointError> {
        let bytes = state.to_bytes()?;
        let mut run = self.runs.entry(run_id.to_string()).or_default();
        let sequence = run.values().map(|c| c.sequence).max().unwrap_or(0) + 1;
        let saved_at = now();

        run.insert(
            stage_id.to_string(),
            StoredCheckpoint {
                ordinal,
                sequence,
                saved_at,
                state: bytes,
            },
        );

        Ok(CheckpointInfo {
            stage_id: stage_id.to_string(),
            ordinal,
            sequence,
            saved_at,
            current: true,
        })
    }

    async fn load(&self, run_id: &str, stage_id: &str) -> Result<Option<RunState>, CheckpointError> {
        let bytes = self
            .runs
            .get(run_id)
            .and_then(|run| run.get(stage_id).map(|c| c.state.clone()));
        match bytes {
            Some(b) => Ok(Some(RunState::from_slice(&b)?)),
            None => Ok(None),
        }
    }

    async fn entries(&self, run_id: &str) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        Ok(self
            .runs
            .get(run_id)
            .map(|run| {
                run.iter()
                    .map(|(stage_id, c)| CheckpointInfo {
                        stage_id: stage_id.clone(),
                        ordinal: c.ordinal,
                        sequence: c.sequence,
                        saved_at: c.saved_at,
                        current: false,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn runs(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.runs.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use serde_json::json;

    fn state_with(value: i64) -> RunState {
        let mut state = RunState::new("run_a", BTreeMap::new());
        state.apply("s", StageOutput::ok_value("k", json!(value))).unwrap();
        state
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryCheckpointStore::new();
        let state = state_with(1);
        let info = store.save("run_a", "s", 0, &state).await.unwrap();

        assert_eq!(info.sequence, 1);
        assert_eq!(store.load("run_a", "s").await.unwrap(), Some(state));
        assert_eq!(store.load("run_a", "other").await.unwrap(), None);
        assert_eq!(store.load("run_b", "s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_write_wins_and_sequence_grows() {
        let store = InMemoryCheckpointStore::new();
        store.save("run_a", "s", 0, &state_with(1)).await.unwrap();
        store.save("run_a", "t", 1, &state_with(2)).await.unwrap();
        let info = store.save("run_a", "s", 0, &state_with(3)).await.unwrap();

        assert_eq!(info.sequence, 3);
        assert_eq!(store.count("run_a"), 2);
        let loaded = store.load("run_a", "s").await.unwrap().unwrap();
        assert_eq!(loaded.output("k"), Some(&json!(3)));
        // t is now superseded by the re-saved s.
        assert_eq!(store.latest_completed_stage("run_a").await.unwrap(), Some("s".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_run_has_no_latest() {
        let store = InMemoryCheckpointStore::new();
        assert_eq!(store.latest_completed_stage("nope").await.unwrap(), None);
        assert!(store.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_sorted() {
        let store = InMemoryCheckpointStore::new();
        store.save("run_b", "s", 0, &state_with(1)).await.unwrap();
        store.save("run_a", "s", 0, &state_with(1)).await.unwrap();
        assert_eq!(store.runs().await.unwrap(), vec!["run_a", "run_b"]);
    }
}
