//! Error types for the draftflow engine.
//!
//! Only fatal conditions travel through [`DraftflowError`]. Malformed model
//! output is not an error at this level: it is absorbed by the stage that
//! requested it and surfaces as a degraded result plus an audit entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::invoke::InvocationError;

/// The main error type for draftflow operations.
#[derive(Debug, Error)]
pub enum DraftflowError {
    /// The pipeline graph failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A generative call failed at the transport level and could not be recovered.
    #[error("{0}")]
    Invocation(#[from] InvocationError),

    /// The checkpoint store failed; the run cannot continue without durable state.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// A stage tried to overwrite a key owned by another stage.
    #[error("{0}")]
    OwnershipConflict(#[from] OwnershipConflictError),

    /// A stage read an output key it did not declare.
    #[error("{0}")]
    UndeclaredDependency(#[from] UndeclaredDependencyError),

    /// A stage returned a write for a key it did not declare.
    #[error("{0}")]
    UndeclaredWrite(#[from] UndeclaredWriteError),

    /// A declared input is absent from the run state.
    #[error("Stage '{stage}' requires '{key}', which is not present in the run state")]
    MissingInput {
        /// The reading stage.
        stage: String,
        /// The missing key.
        key: String,
    },

    /// The restore point was superseded by a later re-run of an earlier stage.
    #[error("Checkpoint for stage '{stage}' in run '{run_id}' is superseded; re-run from an earlier stage")]
    StaleCheckpoint {
        /// The run identifier.
        run_id: String,
        /// The stage whose checkpoint is no longer current.
        stage: String,
    },

    /// A stage identifier is not part of the graph.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// A stage exists but is not reachable under the current flags.
    #[error("Stage '{stage}' is not on the active path for the current configuration")]
    StageNotOnPath {
        /// The requested stage.
        stage: String,
    },

    /// The checkpoint needed to restore a run does not exist.
    #[error("No checkpoint for stage '{stage}' in run '{run_id}'")]
    MissingCheckpoint {
        /// The run identifier.
        run_id: String,
        /// The stage whose checkpoint was required.
        stage: String,
    },

    /// A stage needs a generative backend but none was configured.
    #[error("Stage '{stage}' needs a generative backend, but none is configured")]
    NoBackend {
        /// The stage that asked for one.
        stage: String,
    },

    /// A stage failed for a stage-specific reason.
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution {
        /// The failing stage.
        stage: String,
        /// What went wrong.
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DraftflowError {
    /// Creates a stage execution error.
    #[must_use]
    pub fn stage_execution(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Metadata about a graph validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-006-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-006-CYCLE",
            format!("Pipeline contains an edge cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Stages run once per pass; remove the edge that loops back.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a stage writes a key that another stage owns.
#[derive(Debug, Clone, Error)]
#[error("Ownership conflict: key '{key}' is owned by stage '{owner}', not '{writer}'")]
pub struct OwnershipConflictError {
    /// The contested key.
    pub key: String,
    /// The stage that first wrote the key.
    pub owner: String,
    /// The stage that attempted the overwrite.
    pub writer: String,
}

impl OwnershipConflictError {
    /// Creates a new ownership conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>, owner: impl Into<String>, writer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            writer: writer.into(),
        }
    }
}

/// Error raised when accessing an undeclared dependency.
#[derive(Debug, Clone, Error)]
#[error("Undeclared dependency: stage '{stage}' attempted to read '{key}' which is not in its declared reads")]
pub struct UndeclaredDependencyError {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredDependencyError {
    /// Creates a new undeclared dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// Error raised when a stage returns a write outside its declared writes.
#[derive(Debug, Clone, Error)]
#[error("Undeclared write: stage '{stage}' produced '{key}' which is not in its declared writes")]
pub struct UndeclaredWriteError {
    /// The writing stage.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredWriteError {
    /// Creates a new undeclared write error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}
