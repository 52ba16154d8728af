//! Run status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing has executed yet.
    #[default]
    NotStarted,
    /// A stage is executing.
    Running {
        /// The executing stage.
        stage: String,
    },
    /// The graph reached its end.
    Completed,
    /// A stage failed fatally; its checkpoint was not written.
    Failed {
        /// The failing stage.
        stage: String,
        /// The error message.
        error: String,
    },
    /// The operator cancelled the run while `stage` was executing.
    Interrupted {
        /// The stage whose work was discarded.
        stage: String,
    },
}

impl RunStatus {
    /// Returns true if the run will make no further progress without a resume.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Interrupted { .. }
        )
    }

    /// Returns true if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns the stage the status refers to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Running { stage } | Self::Failed { stage, .. } | Self::Interrupted { stage } => {
                Some(stage)
            }
            Self::NotStarted | Self::Completed => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running { stage } => write!(f, "running({stage})"),
            Self::Completed => write!(f, "completed"),
            Self::Failed { stage, error } => write!(f, "failed({stage}): {error}"),
            Self::Interrupted { stage } => write!(f, "interrupted({stage})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::NotStarted.is_terminal());
        assert!(!RunStatus::Running { stage: "a".into() }.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Interrupted { stage: "a".into() }.is_terminal());
    }

    #[test]
    fn test_status_stage_and_display() {
        let failed = RunStatus::Failed {
            stage: "plan".into(),
            error: "backend gone".into(),
        };
        assert_eq!(failed.stage(), Some("plan"));
        assert_eq!(failed.to_string(), "failed(plan): backend gone");
        assert_eq!(RunStatus::Completed.stage(), None);
    }

    #[test]
    fn test_status_serialization() {
        let value = serde_json::to_value(RunStatus::Running { stage: "ingest".into() }).unwrap();
        assert_eq!(value, serde_json::json!({"status": "running", "stage": "ingest"}));
    }
}
