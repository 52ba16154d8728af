//! SQLite-backed checkpoint store. Persistent across process restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CheckpointError, CheckpointInfo, CheckpointStore};
use crate::state::RunState;
use crate::utils::now;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

fn open(path: &Path) -> Result<Connection, CheckpointError> {
    let conn = Connection::open(path).map_err(storage)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(storage)?;
    Ok(conn)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Serialization(format!("bad saved_at '{text}': {e}")))
}

/// Checkpoint store in a single SQLite file.
///
/// One row per `(run_id, stage_id)`. Each save runs in an immediate
/// transaction, so a crash leaves either the old row or the new one. The
/// database uses WAL journaling and a busy timeout so distinct runs can save
/// concurrently. Blocking calls run on `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    /// Opens or creates the database and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }

        let conn = open(&db_path)?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(storage)?;
        conn.execute(
            r"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id   TEXT    NOT NULL,
                stage_id TEXT    NOT NULL,
                ordinal  INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                saved_at TEXT    NOT NULL,
                state    TEXT    NOT NULL,
                PRIMARY KEY (run_id, stage_id)
            )
            ",
            [],
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        stage_id: &str,
        ordinal: usize,
        state: &RunState,
    ) -> Result<CheckpointInfo, CheckpointError> {
        let state_text = serde_json::to_string(state)?;
        let run_key = run_id.to_string();
        let stage_key = stage_id.to_string();
        let ordinal_db = i64::try_from(ordinal).map_err(storage)?;
        let saved_at = now();
        let saved_text = saved_at.to_rfc3339();
        let db_path = self.db_path.clone();

        let sequence = tokio::task::spawn_blocking(move || {
            let (run_id, stage_id) = (run_key, stage_key);
            let mut conn = open(&db_path)?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(storage)?;
            let max: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(sequence), 0) FROM checkpoints WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            let sequence = max + 1;
            tx.execute(
                "INSERT OR REPLACE INTO checkpoints (run_id, stage_id, ordinal, sequence, saved_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_id, stage_id, ordinal_db, sequence, saved_text, state_text],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)?;
            Ok::<i64, CheckpointError>(sequence)
        })
        .await
        .map_err(storage)??;

        Ok(CheckpointInfo {
            stage_id: stage_id.to_string(),
            ordinal,
            sequence: u64::try_from(sequence).map_err(storage)?,
            saved_at,
            current: true,
        })
    }

    async fn load(&self, run_id: &str, stage_id: &str) -> Result<Option<RunState>, CheckpointError> {
        let run_id = run_id.to_string();
        let stage_id = stage_id.to_string();
        let db_path = self.db_path.clone();

        let text = tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.query_row(
                "SELECT state FROM checkpoints WHERE run_id = ?1 AND stage_id = ?2",
                params![run_id, stage_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(storage)
        })
        .await
        .map_err(storage)??;

        match text {
            Some(t) => Ok(Some(RunState::from_slice(t.as_bytes())?)),
            None => Ok(None),
        }
    }

    async fn entries(&self, run_id: &str) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let run_id = run_id.to_string();
        let db_path = self.db_path.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT stage_id, ordinal, sequence, saved_at FROM checkpoints WHERE run_id = ?1",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![run_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)??;

        rows.into_iter()
            .map(|(stage_id, ordinal, sequence, saved_at)| {
                Ok(CheckpointInfo {
                    stage_id,
                    ordinal: usize::try_from(ordinal).map_err(storage)?,
                    sequence: u64::try_from(sequence).map_err(storage)?,
                    saved_at: parse_time(&saved_at)?,
                    current: false,
                })
            })
            .collect()
    }

    async fn runs(&self) -> Result<Vec<String>, CheckpointError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare("SELECT DISTINCT run_id FROM checkpoints ORDER BY run_id")
                .map_err(storage)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn state_with(run_id: &str, value: i64) -> RunState {
        let mut state = RunState::new(run_id, BTreeMap::new());
        state.apply("s", StageOutput::ok_value("k", json!(value))).unwrap();
        state
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.db");

        {
            let store = SqliteCheckpointStore::new(&path).unwrap();
            store.save("run_a", "ingest", 0, &state_with("run_a", 1)).await.unwrap();
            store.save("run_a", "analyze", 1, &state_with("run_a", 2)).await.unwrap();
        }

        let reopened = SqliteCheckpointStore::new(&path).unwrap();
        let loaded = reopened.load("run_a", "analyze").await.unwrap().unwrap();
        assert_eq!(loaded, state_with("run_a", 2));
        assert_eq!(
            reopened.latest_completed_stage("run_a").await.unwrap(),
            Some("analyze".to_string())
        );
        assert_eq!(reopened.runs().await.unwrap(), vec!["run_a"]);
    }

    #[tokio::test]
    async fn test_overwrite_and_supersede() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(dir.path().join("c.db")).unwrap();

        store.save("r", "a", 0, &state_with("r", 1)).await.unwrap();
        store.save("r", "b", 1, &state_with("r", 2)).await.unwrap();
        store.save("r", "c", 2, &state_with("r", 3)).await.unwrap();
        let info = store.save("r", "b", 1, &state_with("r", 4)).await.unwrap();
        assert_eq!(info.sequence, 4);

        let list = store.list("r").await.unwrap();
        let stages: Vec<_> = list.iter().map(|c| (c.stage_id.as_str(), c.current)).collect();
        assert_eq!(stages, vec![("a", true), ("b", true), ("c", false)]);
        assert_eq!(store.latest_completed_stage("r").await.unwrap(), Some("b".to_string()));

        let latest = store.latest_checkpoint("r").await.unwrap().unwrap();
        assert_eq!(latest.state.output("k"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(dir.path().join("c.db")).unwrap();
        assert_eq!(store.load("r", "a").await.unwrap(), None);
        assert_eq!(store.latest_completed_stage("r").await.unwrap(), None);
        assert!(store.latest_checkpoint("r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SqliteCheckpointStore::new(dir.path().join("c.db")).unwrap());

        let mut handles = Vec::new();
        for run in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let run_id = format!("run_{run}");
                for (ordinal, stage) in ["a", "b", "c"].iter().enumerate() {
                    store
                        .save(&run_id, stage, ordinal, &state_with(&run_id, 1))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.runs().await.unwrap().len(), 4);
        for run in 0..4 {
            let list = store.list(&format!("run_{run}")).await.unwrap();
            let seqs: Vec<_> = list.iter().map(|c| c.sequence).collect();
            assert_eq!(seqs, vec![1, 2, 3]);
        }
    }
}
