//! The validated stage graph.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use super::edge::select_edge;
use super::{Edge, StageSpec};
use crate::errors::DraftflowError;
use crate::state::RunState;

/// Static description of one stage, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Stage id.
    pub id: String,
    /// Topological position.
    pub ordinal: usize,
    /// Declared reads.
    pub reads: BTreeSet<String>,
    /// Declared writes.
    pub writes: BTreeSet<String>,
    /// Outgoing edges.
    pub edges: Vec<Edge>,
    /// Artifact prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// An acyclic graph of stages with a single entry.
///
/// Built by [`PipelineBuilder`](super::PipelineBuilder). Stage ordinals are
/// positions in the topological order and are what checkpoints are ranked by.
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    entry: String,
    stages: HashMap<String, StageSpec>,
    order: Vec<String>,
}

impl StageGraph {
    pub(crate) fn new(
        name: String,
        entry: String,
        stages: HashMap<String, StageSpec>,
        order: Vec<String>,
    ) -> Self {
        Self {
            name,
            entry,
            stages,
            order,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entry stage.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Returns stage ids in topological order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the stage exists.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.contains_key(stage)
    }

    /// Returns a stage's spec.
    #[must_use]
    pub fn spec(&self, stage: &str) -> Option<&StageSpec> {
        self.stages.get(stage)
    }

    /// Returns a stage's topological position.
    #[must_use]
    pub fn ordinal(&self, stage: &str) -> Option<usize> {
        self.order.iter().position(|s| s == stage)
    }

    /// Returns the stage that follows `stage` under `state`, or `None` at the end.
    #[must_use]
    pub fn next(&self, stage: &str, state: &RunState) -> Option<&str> {
        let spec = self.stages.get(stage)?;
        select_edge(&spec.edges, state).and_then(|e| e.target.stage())
    }

    /// Returns the stages visited from the entry when guards are evaluated
    /// against `state`.
    #[must_use]
    pub fn active_path(&self, state: &RunState) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(self.entry.as_str());
        while let Some(stage) = current {
            // Acyclic, so this can only trip on a graph built outside the builder.
            if path.len() > self.stages.len() {
                break;
            }
            path.push(stage);
            current = self.next(stage, state);
        }
        path
    }

    /// Returns the direct predecessor of `stage` on the active path.
    ///
    /// `Ok(None)` means `stage` is the entry.
    pub fn predecessor(&self, stage: &str, state: &RunState) -> Result<Option<&str>, DraftflowError> {
        if !self.contains(stage) {
            return Err(DraftflowError::UnknownStage(stage.to_string()));
        }
        let path = self.active_path(state);
        match path.iter().position(|s| *s == stage) {
            Some(0) => Ok(None),
            Some(i) => Ok(Some(path[i - 1])),
            None => Err(DraftflowError::StageNotOnPath {
                stage: stage.to_string(),
            }),
        }
    }

    /// Returns every stage reachable from `stage`, excluding itself.
    #[must_use]
    pub fn downstream(&self, stage: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![stage.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(spec) = self.stages.get(&current) {
                for next in spec.successors() {
                    if seen.insert(next.to_string()) {
                        stack.push(next.to_string());
                    }
                }
            }
        }
        seen
    }

    /// Describes every stage in topological order.
    #[must_use]
    pub fn describe(&self) -> Vec<StageSummary> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(ordinal, id)| {
                let spec = self.stages.get(id)?;
                Some(StageSummary {
                    id: id.clone(),
                    ordinal,
                    reads: spec.contract().reads.clone(),
                    writes: spec.contract().writes.clone(),
                    edges: spec.edges.clone(),
                    artifact: spec.artifact.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, StageSpec};
    use crate::stages::NoOpStage;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn noop(id: &str) -> Arc<NoOpStage> {
        Arc::new(NoOpStage::new(id))
    }

    fn branching_graph() -> StageGraph {
        PipelineBuilder::new("branching")
            .stage(StageSpec::new(noop("ingest")).then("synthesize"))
            .unwrap()
            .stage(
                StageSpec::new(noop("synthesize"))
                    .with_edge(Edge::to("plan").when_flag("skip_critique"))
                    .then("critique"),
            )
            .unwrap()
            .stage(StageSpec::new(noop("critique")).then("plan"))
            .unwrap()
            .stage(
                StageSpec::new(noop("plan"))
                    .with_edge(Edge::end().when_flag("skip_write"))
                    .then("write"),
            )
            .unwrap()
            .stage(StageSpec::new(noop("write")))
            .unwrap()
            .build()
            .unwrap()
    }

    fn state(flags: &[&str]) -> RunState {
        let config: BTreeMap<_, _> = flags.iter().map(|f| ((*f).to_string(), json!(true))).collect();
        RunState::new("r", config)
    }

    #[test]
    fn test_order_and_ordinals() {
        let graph = branching_graph();
        assert_eq!(graph.order(), ["ingest", "synthesize", "critique", "plan", "write"]);
        assert_eq!(graph.ordinal("critique"), Some(2));
        assert_eq!(graph.ordinal("nope"), None);
        assert_eq!(graph.stage_count(), 5);
    }

    #[test]
    fn test_next_follows_guards() {
        let graph = branching_graph();
        assert_eq!(graph.next("synthesize", &state(&[])), Some("critique"));
        assert_eq!(graph.next("synthesize", &state(&["skip_critique"])), Some("plan"));
        assert_eq!(graph.next("plan", &state(&["skip_write"])), None);
        assert_eq!(graph.next("write", &state(&[])), None);
    }

    #[test]
    fn test_active_path() {
        let graph = branching_graph();
        assert_eq!(
            graph.active_path(&state(&[])),
            vec!["ingest", "synthesize", "critique", "plan", "write"]
        );
        assert_eq!(
            graph.active_path(&state(&["skip_critique", "skip_write"])),
            vec!["ingest", "synthesize", "plan"]
        );
    }

    #[test]
    fn test_predecessor_depends_on_active_path() {
        let graph = branching_graph();
        assert_eq!(graph.predecessor("plan", &state(&[])).unwrap(), Some("critique"));
        assert_eq!(graph.predecessor("plan", &state(&["skip_critique"])).unwrap(), Some("synthesize"));
        assert_eq!(graph.predecessor("ingest", &state(&[])).unwrap(), None);
    }

    #[test]
    fn test_predecessor_errors() {
        let graph = branching_graph();
        assert!(matches!(
            graph.predecessor("critique", &state(&["skip_critique"])),
            Err(DraftflowError::StageNotOnPath { .. })
        ));
        assert!(matches!(
            graph.predecessor("missing", &state(&[])),
            Err(DraftflowError::UnknownStage(_))
        ));
    }

    #[test]
    fn test_downstream() {
        let graph = branching_graph();
        let down: Vec<_> = graph.downstream("synthesize").into_iter().collect();
        assert_eq!(down, vec!["critique", "plan", "write"]);
        assert!(graph.downstream("write").is_empty());
    }

    #[test]
    fn test_describe() {
        let graph = branching_graph();
        let summary = graph.describe();
        assert_eq!(summary.len(), 5);
        assert_eq!(summary[1].id, "synthesize");
        assert_eq!(summary[1].edges.len(), 2);
    }
}
