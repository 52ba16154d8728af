//! Testing utilities for draftflow pipelines.
//!
//! This module provides:
//! - A scripted generative backend
//! - A recording stage for scheduler tests
//! - Fixtures for fast retries and run configs

mod fixtures;
mod mocks;

pub use fixtures::{config_map, fast_retry_invoker};
pub use mocks::{RecordedExecution, RecordingStage, ScriptedBackend, ScriptedReply};
