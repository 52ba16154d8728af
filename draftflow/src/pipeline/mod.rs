//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications and guarded edges
//! - A builder that validates the graph and fixes stage ordinals
//! - The checkpointing scheduler, including resume and from-stage re-runs

mod builder;
mod edge;
mod graph;
mod scheduler;
mod spec;


pub use builder::PipelineBuilder;
pub use edge::{select_edge, Edge, Guard, Target};
pub use graph::{StageGraph, StageSummary};
pub use scheduler::{RunReport, RunRequest, Scheduler};
pub use spec::StageSpec;
