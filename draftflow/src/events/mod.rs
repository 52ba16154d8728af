//! Run lifecycle events.
//!
//! The scheduler holds one [`EventSink`] and reports every transition of a
//! run through it. Sinks never fail the run; a sink that cannot deliver an
//! event drops it.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the scheduler.
pub mod names {
    /// A run began (fresh or resumed).
    pub const RUN_STARTED: &str = "run.started";
    /// A stage is about to execute.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage succeeded and its state was committed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage returned a fatal error.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage succeeded with one or more defaulted sub-calls.
    pub const STAGE_DEGRADED: &str = "stage.degraded";
    /// A checkpoint was persisted.
    pub const CHECKPOINT_SAVED: &str = "checkpoint.saved";
    /// The run reached the end of the graph.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// The run halted on a fatal error.
    pub const RUN_FAILED: &str = "run.failed";
    /// The run was cancelled by the operator.
    pub const RUN_INTERRUPTED: &str = "run.interrupted";
}
