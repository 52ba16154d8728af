//! Sequential, checkpointed execution of a stage graph.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{StageGraph, StageSpec};
use crate::artifacts::ArtifactWriter;
use crate::cancellation::CancellationToken;
use crate::checkpoint::CheckpointStore;
use crate::core::{RunStatus, StageOutput};
use crate::errors::{DraftflowError, UndeclaredWriteError};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::invoke::{InvocationError, ResilientInvoker};
use crate::stages::StageContext;
use crate::state::RunState;

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Run identifier.
    pub run_id: String,
    /// Initial configuration, used when the run starts from the entry.
    pub config: BTreeMap<String, Value>,
    /// Configuration applied on top of whatever state the run starts from.
    pub overrides: BTreeMap<String, Value>,
    /// Re-run from this stage, restoring its predecessor's checkpoint.
    pub from_stage: Option<String>,
}

impl RunRequest {
    /// Creates a request that starts fresh or continues from the last checkpoint.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// Sets the initial configuration.
    #[must_use]
    pub fn with_config(mut self, config: BTreeMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Adds one override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    /// Sets all overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<String, Value>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Re-runs from `stage`.
    #[must_use]
    pub fn from_stage(mut self, stage: impl Into<String>) -> Self {
        self.from_stage = Some(stage.into());
        self
    }

    fn fresh_state(&self) -> RunState {
        let mut state = RunState::new(&self.run_id, self.config.clone());
        state.apply_overrides(self.overrides.clone());
        state
    }
}

/// Outcome of one call to [`Scheduler::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// Terminal status.
    pub status: RunStatus,
    /// The last committed state.
    pub state: RunState,
    /// Stages executed by this call, in order.
    pub executed: Vec<String>,
    /// The checkpoint the run was restored from, if any.
    pub resumed_from: Option<String>,
    /// Sub-calls that fell back to defaults during this call.
    pub degraded: usize,
    /// Wall time of this call.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

enum Attempt {
    Succeeded(StageOutput),
    Failed(DraftflowError),
    Interrupted,
}

struct Start {
    state: RunState,
    stage: Option<String>,
    resumed_from: Option<String>,
}

/// Runs a [`StageGraph`] one stage at a time.
///
/// After each successful stage the next state is computed, checkpointed and
/// only then committed, so the checkpoint for a stage always holds all of
/// its writes. A fatal stage error halts the run without a checkpoint for
/// that stage. Cancellation drops the in-flight stage; it is re-executed in
/// full on the next resume.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<StageGraph>,
    store: Arc<dyn CheckpointStore>,
    invoker: Option<ResilientInvoker>,
    events: Arc<dyn EventSink>,
    cancellation: Option<Arc<CancellationToken>>,
    artifacts: Option<ArtifactWriter>,
}

impl Scheduler {
    /// Creates a scheduler with no backend, events or artifacts.
    #[must_use]
    pub fn new(graph: Arc<StageGraph>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            store,
            invoker: None,
            events: Arc::new(NoOpEventSink),
            cancellation: None,
            artifacts: None,
        }
    }

    /// Sets the invoker lent to generative stages.
    #[must_use]
    pub fn with_invoker(mut self, invoker: ResilientInvoker) -> Self {
        self.invoker = Some(match &self.cancellation {
            Some(token) => invoker.with_cancellation(token.clone()),
            None => invoker,
        });
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the cancellation token. The invoker, if any, shares it.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.invoker = self.invoker.map(|i| i.with_cancellation(token.clone()));
        self.cancellation = Some(token);
        self
    }

    /// Writes artifacts for stages that name a prefix.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: ArtifactWriter) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Runs, resumes, or re-runs from a stage, depending on the request and
    /// on what the store holds for the run.
    ///
    /// Without `from_stage`, an unknown run starts at the entry and a known
    /// run continues after its latest completed stage. With `from_stage`, the
    /// predecessor on the active path is restored and that stage runs next.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when the run cannot be set up (unknown stage, stage
    /// off the active path, missing, superseded or unreadable checkpoint). Failures while
    /// executing are reported through [`RunReport::status`].
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, DraftflowError> {
        let span = info_span!("run", run_id = %request.run_id, pipeline = %self.graph.name());
        async {
            let start = self.resolve_start(&request).await?;
            Ok(self.drive(start).await)
        }
        .instrument(span)
        .await
    }

    async fn resolve_start(&self, request: &RunRequest) -> Result<Start, DraftflowError> {
        let run_id = request.run_id.as_str();
        let latest = self.store.latest_checkpoint(run_id).await?;

        if let Some(target) = request.from_stage.as_deref() {
            if !self.graph.contains(target) {
                return Err(DraftflowError::UnknownStage(target.to_string()));
            }
            let mut probe = match &latest {
                Some(cp) => cp.state.clone(),
                None => request.fresh_state(),
            };
            probe.apply_overrides(request.overrides.clone());

            let Some(pred) = self.graph.predecessor(target, &probe)? else {
                info!(stage = target, "Restarting from the entry stage");
                return Ok(Start {
                    state: request.fresh_state(),
                    stage: Some(target.to_string()),
                    resumed_from: None,
                });
            };

            let infos = self.store.list(run_id).await?;
            match infos.iter().find(|info| info.stage_id == pred) {
                None => {
                    return Err(DraftflowError::MissingCheckpoint {
                        run_id: run_id.to_string(),
                        stage: pred.to_string(),
                    })
                }
                Some(info) if !info.current => {
                    warn!(stage = target, restored = pred, "Restore point is superseded");
                    return Err(DraftflowError::StaleCheckpoint {
                        run_id: run_id.to_string(),
                        stage: pred.to_string(),
                    });
                }
                Some(_) => {}
            }

            let mut state = self.store.load(run_id, pred).await?.ok_or_else(|| {
                DraftflowError::MissingCheckpoint {
                    run_id: run_id.to_string(),
                    stage: pred.to_string(),
                }
            })?;
            state.apply_overrides(request.overrides.clone());
            info!(stage = target, restored = pred, "Re-running from stage");
            return Ok(Start {
                state,
                stage: Some(target.to_string()),
                resumed_from: Some(pred.to_string()),
            });
        }

        match latest {
            Some(cp) => {
                if !self.graph.contains(&cp.stage_id) {
                    return Err(DraftflowError::UnknownStage(cp.stage_id));
                }
                let mut state = cp.state;
                state.apply_overrides(request.overrides.clone());
                let next = self.graph.next(&cp.stage_id, &state).map(str::to_string);
                info!(
                    restored = %cp.stage_id,
                    next = next.as_deref().unwrap_or("END"),
                    "Resuming from checkpoint"
                );
                Ok(Start {
                    state,
                    stage: next,
                    resumed_from: Some(cp.stage_id),
                })
            }
            None => {
                debug!("No checkpoint found, starting at the entry stage");
                Ok(Start {
                    state: request.fresh_state(),
                    stage: Some(self.graph.entry().to_string()),
                    resumed_from: None,
                })
            }
        }
    }

    async fn drive(&self, start: Start) -> RunReport {
        let started = Instant::now();
        let Start {
            mut state,
            stage: mut current,
            resumed_from,
        } = start;
        let run_id = state.run_id().to_string();
        let mut executed = Vec::new();
        let mut degraded = 0;

        self.events
            .emit(
                names::RUN_STARTED,
                Some(json!({
                    "run_id": &run_id,
                    "stage": &current,
                    "resumed_from": &resumed_from,
                })),
            )
            .await;

        let status = loop {
            let Some(stage_id) = current.take() else {
                info!(executed = executed.len(), "Run completed");
                self.events
                    .emit(names::RUN_COMPLETED, Some(json!({"run_id": &run_id})))
                    .await;
                break RunStatus::Completed;
            };

            let Some(spec) = self.graph.spec(&stage_id) else {
                break self
                    .fail(&run_id, &stage_id, &DraftflowError::UnknownStage(stage_id.clone()))
                    .await;
            };

            if self.is_cancelled() {
                break self.interrupt(&run_id, &stage_id).await;
            }

            let ordinal = self.graph.ordinal(&stage_id).unwrap_or_default();
            let stage_span = info_span!("stage", stage = %stage_id, ordinal);
            self.events
                .emit(names::STAGE_STARTED, Some(json!({"run_id": &run_id, "stage": &stage_id})))
                .await;

            let stage_started = Instant::now();
            let attempt = self.execute_stage(spec, &state).instrument(stage_span.clone()).await;
            let duration_ms = stage_started.elapsed().as_secs_f64() * 1000.0;

            let output = match attempt {
                Attempt::Succeeded(output) => output,
                Attempt::Interrupted => break self.interrupt(&run_id, &stage_id).await,
                Attempt::Failed(err) => break self.fail(&run_id, &stage_id, &err).await,
            };

            let stage_degraded = output.degraded;
            let audit_count = output.audit.len();
            let written: Vec<String> = output.delta.keys().map(str::to_string).collect();

            let next_state = match next_state(spec, &state, output) {
                Ok(next) => next,
                Err(err) => break self.fail(&run_id, &stage_id, &err).await,
            };

            let info = match self.store.save(&run_id, &stage_id, ordinal, &next_state).await {
                Ok(info) => info,
                Err(err) => break self.fail(&run_id, &stage_id, &DraftflowError::from(err)).await,
            };
            state = next_state;

            stage_span.in_scope(|| {
                debug!(sequence = info.sequence, "Checkpoint saved");
                self.events.try_emit(
                    names::CHECKPOINT_SAVED,
                    Some(json!({
                        "run_id": &run_id,
                        "stage": &stage_id,
                        "ordinal": ordinal,
                        "sequence": info.sequence,
                    })),
                );
                self.write_artifact(spec, &state);

                if stage_degraded > 0 {
                    warn!(degraded = stage_degraded, "Stage completed with defaulted sub-calls");
                    self.events.try_emit(
                        names::STAGE_DEGRADED,
                        Some(json!({"run_id": &run_id, "stage": &stage_id, "degraded": stage_degraded})),
                    );
                }
                info!(duration_ms, writes = ?written, audit = audit_count, "Stage completed");
                self.events.try_emit(
                    names::STAGE_COMPLETED,
                    Some(json!({
                        "run_id": &run_id,
                        "stage": &stage_id,
                        "duration_ms": duration_ms,
                        "writes": &written,
                    })),
                );
            });

            degraded += stage_degraded;
            current = self.graph.next(&stage_id, &state).map(str::to_string);
            executed.push(stage_id);
        };

        RunReport {
            run_id,
            status,
            state,
            executed,
            resumed_from,
            degraded,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    async fn execute_stage(&self, spec: &StageSpec, state: &RunState) -> Attempt {
        let ctx = StageContext::new(spec.id(), spec.contract(), state)
            .with_invoker(self.invoker.as_ref());

        let result = match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Attempt::Interrupted,
                    result = spec.stage.execute(&ctx) => result,
                }
            }
            None => spec.stage.execute(&ctx).await,
        };

        match result {
            Ok(output) => Attempt::Succeeded(output),
            Err(err) if self.is_cancelled() && is_cancellation(&err) => Attempt::Interrupted,
            Err(err) => Attempt::Failed(err),
        }
    }

    fn write_artifact(&self, spec: &StageSpec, state: &RunState) {
        let (Some(writer), Some(prefix)) = (&self.artifacts, spec.artifact.as_deref()) else {
            return;
        };
        match writer.write(state, prefix, &spec.contract().writes) {
            Ok(path) => debug!(path = %path.display(), "Artifact written"),
            Err(err) => warn!(error = %err, prefix, "Artifact write failed"),
        }
    }

    async fn fail(&self, run_id: &str, stage_id: &str, err: &DraftflowError) -> RunStatus {
        error!(stage = stage_id, error = %err, "Stage failed, run halted");
        let payload = json!({"run_id": run_id, "stage": stage_id, "error": err.to_string()});
        self.events.emit(names::STAGE_FAILED, Some(payload.clone())).await;
        self.events.emit(names::RUN_FAILED, Some(payload)).await;
        RunStatus::Failed {
            stage: stage_id.to_string(),
            error: err.to_string(),
        }
    }

    async fn interrupt(&self, run_id: &str, stage_id: &str) -> RunStatus {
        let reason = self
            .cancellation
            .as_ref()
            .and_then(|t| t.reason())
            .unwrap_or_default();
        warn!(stage = stage_id, reason = %reason, "Run interrupted; stage work discarded");
        self.events
            .emit(
                names::RUN_INTERRUPTED,
                Some(json!({"run_id": run_id, "stage": stage_id, "reason": reason})),
            )
            .await;
        RunStatus::Interrupted {
            stage: stage_id.to_string(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

fn is_cancellation(err: &DraftflowError) -> bool {
    matches!(err, DraftflowError::Invocation(InvocationError::Cancelled(_)))
}

/// Applies a stage's output to a copy of `state`.
fn next_state(spec: &StageSpec, state: &RunState, output: StageOutput) -> Result<RunState, DraftflowError> {
    let id = spec.id();
    if let Some(key) = output.delta.keys().find(|k| !spec.contract().can_write(k)) {
        return Err(UndeclaredWriteError::new(id, key).into());
    }
    let mut next = state.clone();
    next.apply(id, output)?;
    Ok(next)
}
