//! Run state and state deltas.

mod delta;
mod run_state;

pub use delta::StateDelta;
pub use run_state::RunState;
