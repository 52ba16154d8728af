//! Stage specifications.

use std::sync::Arc;

use super::Edge;
use crate::stages::{Stage, StageContract};

/// A stage plus its place in the graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The stage implementation.
    pub stage: Arc<dyn Stage>,
    /// Outgoing edges in evaluation order.
    pub edges: Vec<Edge>,
    /// File prefix for the human-readable artifact, if any.
    pub artifact: Option<String>,
}

impl StageSpec {
    /// Creates a spec with no outgoing edges.
    #[must_use]
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            edges: Vec::new(),
            artifact: None,
        }
    }

    /// Adds an unconditional edge to `target`.
    #[must_use]
    pub fn then(self, target: impl Into<String>) -> Self {
        self.with_edge(Edge::to(target))
    }

    /// Adds an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Writes the stage's outputs to `<run_dir>/<prefix>.json` after each checkpoint.
    #[must_use]
    pub fn with_artifact(mut self, prefix: impl Into<String>) -> Self {
        self.artifact = Some(prefix.into());
        self
    }

    /// Returns the stage id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.stage.id()
    }

    /// Returns the stage contract.
    #[must_use]
    pub fn contract(&self) -> &StageContract {
        self.stage.contract()
    }

    /// Returns the stage ids this stage can lead to.
    pub fn successors(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().filter_map(|e| e.target.stage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Target;
    use crate::stages::NoOpStage;

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new(Arc::new(NoOpStage::new("synthesize")))
            .then("critique")
            .with_edge(Edge::to("plan").when_flag("skip_critique"))
            .with_artifact("03_concept_graph");

        assert_eq!(spec.id(), "synthesize");
        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.artifact.as_deref(), Some("03_concept_graph"));
        assert_eq!(spec.successors().collect::<Vec<_>>(), vec!["critique", "plan"]);
    }

    #[test]
    fn test_end_edge_has_no_successor() {
        let spec = StageSpec::new(Arc::new(NoOpStage::new("write")))
            .with_edge(Edge::end().when_flag("skip_translate"))
            .then("translate");

        assert_eq!(spec.edges[0].target, Target::End);
        assert_eq!(spec.successors().collect::<Vec<_>>(), vec!["translate"]);
    }
}
