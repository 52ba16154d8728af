//! Stage output type with factory methods.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AuditEntry;
use crate::errors::DraftflowError;
use crate::state::StateDelta;

/// The result of one stage execution.
///
/// `Ok` is the success channel (possibly with degraded sub-calls folded in);
/// `Err` is the fatal channel that halts the run at this stage.
pub type StageResult = Result<StageOutput, DraftflowError>;

/// The successful output of a stage execution.
///
/// Carries the state writes, the audit entries the stage produced in call
/// order, and how many of its sub-calls fell back to a default value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Output writes to apply to the run state.
    #[serde(default)]
    pub delta: StateDelta,

    /// Audit entries, in the order the stage produced them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,

    /// Number of sub-calls that substituted a default value.
    #[serde(default)]
    pub degraded: usize,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl StageOutput {
    /// Creates a successful output with the given writes.
    #[must_use]
    pub fn ok(delta: StateDelta) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }

    /// Creates a successful output that writes nothing.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::default()
    }

    /// Creates a successful output with a single write.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::ok(StateDelta::new().with(key, value))
    }

    /// Replaces the audit entries.
    #[must_use]
    pub fn with_audit(mut self, audit: Vec<AuditEntry>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the degraded sub-call count.
    #[must_use]
    pub fn with_degraded(mut self, degraded: usize) -> Self {
        self.degraded = degraded;
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records one sub-call: appends its audit entry and counts it if degraded.
    pub fn record(&mut self, entry: AuditEntry, degraded: bool) {
        self.audit.push(entry);
        if degraded {
            self.degraded += 1;
        }
    }

    /// Returns true if any sub-call degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded > 0
    }

    /// Gets a written value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.delta.get(key)
    }
}
