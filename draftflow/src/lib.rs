//! # Draftflow
//!
//! A checkpointed, failure-tolerant execution engine for multi-stage
//! content-generation pipelines.
//!
//! Draftflow provides:
//!
//! - **Structured extraction**: pull a JSON payload out of free-form model output
//! - **Resilient invocation**: bounded retries for transport failures only
//! - **Degrading stages**: malformed output falls back to a default and is audited
//! - **Durable checkpoints**: one snapshot per completed stage, in memory or SQLite
//! - **Graph scheduling**: guarded branches, resume, and re-runs from any stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use draftflow::prelude::*;
//!
//! let graph = PipelineBuilder::new("demo")
//!     .stage(StageSpec::new(Arc::new(load)).then("summarize"))?
//!     .stage(StageSpec::new(Arc::new(summarize)))?
//!     .build()?;
//!
//! let report = Scheduler::new(Arc::new(graph), Arc::new(InMemoryCheckpointStore::new()))
//!     .with_invoker(ResilientInvoker::new(backend))
//!     .run(RunRequest::new("run_1").with_config(config))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod export;
pub mod extract;
pub mod invoke;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod state;
pub mod testing;
pub mod utils;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::ArtifactWriter;
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        Checkpoint, CheckpointError, CheckpointInfo, CheckpointStore, InMemoryCheckpointStore,
        SqliteCheckpointStore,
    };
    pub use crate::core::{AuditEntry, AuditError, AuditLog, ErrorTag, RunStatus, StageOutput, StageResult};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DraftflowError, OwnershipConflictError,
        PipelineValidationError, UndeclaredDependencyError, UndeclaredWriteError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::extract::{extract, ExtractionOutcome, RequiredFields, SchemaValidator, Strategy};
    pub use crate::invoke::{CallOptions, GenerativeBackend, ResilientInvoker, RetryConfig, TransportError};
    pub use crate::pipeline::{Edge, PipelineBuilder, RunReport, RunRequest, Scheduler, StageGraph, StageSpec};
    pub use crate::stages::{
        FnStage, GenerationSettings, MapGenerateStage, OutputMode, ReduceGenerateStage, ReduceInput,
        Stage, StageContext, StageContract,
    };
    pub use crate::state::{RunState, StateDelta};
    pub use crate::utils::{iso_timestamp, make_run_id, Timestamp};
}
