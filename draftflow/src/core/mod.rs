//! Core domain model types for draftflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Audit entries and the append-only audit log
//! - Stage output type with factory methods
//! - Run status

mod audit;
mod output;
#[cfg(test)]
mod output_tests;
mod status;

pub use audit::{AuditEntry, AuditError, AuditLog, ErrorTag};
pub use output::{StageOutput, StageResult};
pub use status::RunStatus;
