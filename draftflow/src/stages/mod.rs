//! Stage trait and implementations.
//!
//! A stage reads the outputs it declares, may issue any number of generative
//! sub-calls one after another, and returns the writes it wants applied. A
//! sub-call that cannot produce a usable value falls back to the stage's
//! documented default; only transport exhaustion makes the stage fatal.

mod context;
mod contract;
mod generative;
mod ingest;
mod prompt;

pub use context::{GenerationRequest, Generated, OutputMode, StageContext};
pub use contract::StageContract;
pub use generative::{GenerationSettings, MapGenerateStage, ReduceGenerateStage, ReduceInput};
pub use ingest::{LoadChunksStage, CHUNK_PATTERN_KEY, INPUT_PATH_KEY};
pub use prompt::render_template;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::{StageOutput, StageResult};

/// Trait for pipeline stages.
///
/// Re-executing a stage against the same inputs must be safe: its writes
/// replace the previous ones.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage id.
    fn id(&self) -> &str;

    /// Returns the declared reads and writes.
    fn contract(&self) -> &StageContract;

    /// Executes the stage.
    ///
    /// `Ok` carries the writes, audit entries and degraded count. `Err` is
    /// fatal and halts the run at this stage.
    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult;
}

/// A simple function-based stage for local computation.
pub struct FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageResult + Send + Sync,
{
    id: String,
    contract: StageContract,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageResult + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(id: impl Into<String>, contract: StageContract, func: F) -> Self {
        Self {
            id: id.into(),
            contract,
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("id", &self.id)
            .field("contract", &self.contract)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageResult + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        (self.func)(ctx)
    }
}

/// A stage that does nothing. Useful as a routing junction.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    id: String,
    contract: StageContract,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contract: StageContract::new(),
        }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, _ctx: &StageContext<'_>) -> StageResult {
        Ok(StageOutput::ok_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new(
            "double",
            StageContract::new().reads(["n"]).writes(["doubled"]),
            |ctx| {
                let n = ctx.input("n")?.as_i64().unwrap_or(0);
                Ok(StageOutput::ok_value("doubled", json!(n * 2)))
            },
        );
        assert_eq!(stage.id(), "double");

        let mut state = RunState::new("r", BTreeMap::new());
        state.apply("seed", StageOutput::ok_value("n", json!(21))).unwrap();
        let ctx = StageContext::new(stage.id(), stage.contract(), &state);

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("doubled"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("junction");
        let state = RunState::new("r", BTreeMap::new());
        let ctx = StageContext::new(stage.id(), stage.contract(), &state);

        let output = stage.execute(&ctx).await.unwrap();
        assert!(output.delta.is_empty());
    }
}
