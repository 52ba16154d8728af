//! Audit trail export.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::AuditEntry;
use crate::errors::DraftflowError;
use crate::state::RunState;
use crate::utils::{now, write_atomic, Timestamp};

/// A run's audit trail in a self-describing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditExport {
    /// Run identifier.
    pub run_id: String,
    /// When the export was produced.
    pub exported_at: Timestamp,
    /// Timestamp of the first entry, if any.
    pub started_at: Option<Timestamp>,
    /// Stages that have completed, in execution order.
    pub completed_stages: Vec<String>,
    /// Entry count per error tag.
    pub error_counts: BTreeMap<String, usize>,
    /// Every entry, in append order.
    pub entries: Vec<AuditEntry>,
}

impl AuditExport {
    /// Builds an export from a run state.
    #[must_use]
    pub fn from_state(state: &RunState) -> Self {
        let entries = state.audit().entries().to_vec();
        let mut error_counts = BTreeMap::new();
        for tag in entries.iter().filter_map(AuditEntry::error_tag) {
            *error_counts.entry(tag.to_string()).or_insert(0) += 1;
        }

        Self {
            run_id: state.run_id().to_string(),
            exported_at: now(),
            started_at: entries.first().map(|e| e.timestamp),
            completed_stages: state.completed_stages().to_vec(),
            error_counts,
            entries,
        }
    }

    /// Renders the export as indented JSON.
    pub fn to_json_pretty(&self) -> Result<String, DraftflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the export to `path`, replacing any earlier file.
    pub fn write_to(&self, path: &Path) -> Result<(), DraftflowError> {
        write_atomic(path, self.to_json_pretty()?.as_bytes())?;
        Ok(())
    }
}
