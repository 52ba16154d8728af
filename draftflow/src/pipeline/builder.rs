//! Pipeline builder with validation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{StageGraph, StageSpec};
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::stages::Stage;

/// Builder for validated stage graphs.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: HashMap<String, StageSpec>,
    stage_order: Vec<String>,
    entry: Option<String>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            entry: None,
        }
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns `GRAPH-004-DUPLICATE` if a stage with the same id was added.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a single unconditional edge to `next`.
    pub fn linear(
        self,
        stage: Arc<dyn Stage>,
        next: Option<&str>,
    ) -> Result<Self, PipelineValidationError> {
        let spec = match next {
            Some(target) => StageSpec::new(stage).then(target),
            None => StageSpec::new(stage),
        };
        self.stage(spec)
    }

    /// Adds a stage by mutable reference.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        let id = spec.id().to_string();
        if self.stages.contains_key(&id) {
            return Err(PipelineValidationError::new(format!("Stage '{id}' is defined twice"))
                .with_stages(vec![id.clone()])
                .with_error_info(
                    ContractErrorInfo::new("GRAPH-004-DUPLICATE", format!("Duplicate stage id '{id}'"))
                        .with_fix_hint("Give every stage a unique id."),
                ));
        }
        self.stage_order.push(id.clone());
        self.stages.insert(id, spec);
        Ok(())
    }

    /// Sets the entry stage. Defaults to the first stage added.
    #[must_use]
    pub fn entry(mut self, stage: impl Into<String>) -> Self {
        self.entry = Some(stage.into());
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the graph and builds it.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found, with a `GRAPH-*` code.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                ContractErrorInfo::new("GRAPH-001-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage before building."),
            ));
        }

        let entry = match self.entry.clone() {
            Some(entry) => entry,
            None => self.stage_order[0].clone(),
        };
        if !self.stages.contains_key(&entry) {
            return Err(PipelineValidationError::new(format!("Entry stage '{entry}' is not defined"))
                .with_stages(vec![entry.clone()])
                .with_error_info(
                    ContractErrorInfo::new("GRAPH-002-NO_ENTRY", format!("Unknown entry '{entry}'"))
                        .with_fix_hint("Point the entry at one of the added stages."),
                ));
        }

        self.check_targets()?;
        self.check_fallbacks()?;
        self.detect_cycles()?;
        self.check_write_owners()?;

        let order = self.topological_order();
        Ok(StageGraph::new(self.name, entry, self.stages, order))
    }

    fn ordered_specs(&self) -> impl Iterator<Item = &StageSpec> {
        self.stage_order.iter().filter_map(|id| self.stages.get(id))
    }

    fn check_targets(&self) -> Result<(), PipelineValidationError> {
        for spec in self.ordered_specs() {
            for target in spec.successors() {
                if !self.stages.contains_key(target) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' has an edge to unknown stage '{target}'",
                        spec.id()
                    ))
                    .with_stages(vec![spec.id().to_string(), target.to_string()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "GRAPH-003-UNKNOWN_TARGET",
                            format!("Edge target '{target}' not found"),
                        )
                        .with_context_entry("from", spec.id())
                        .with_fix_hint("Add the target stage or fix the edge."),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_fallbacks(&self) -> Result<(), PipelineValidationError> {
        for spec in self.ordered_specs() {
            let unconditional = spec.edges.iter().filter(|e| !e.is_guarded()).count();
            let guarded = spec.edges.len() - unconditional;
            let problem = if unconditional > 1 {
                Some("has more than one unconditional edge")
            } else if guarded > 0 && unconditional == 0 {
                Some("has guarded edges but no unconditional fallback")
            } else {
                None
            };
            if let Some(problem) = problem {
                return Err(PipelineValidationError::new(format!("Stage '{}' {problem}", spec.id()))
                    .with_stages(vec![spec.id().to_string()])
                    .with_error_info(
                        ContractErrorInfo::new("GRAPH-005-NO_FALLBACK", format!("Stage '{}' {problem}", spec.id()))
                            .with_fix_hint("Give each branching stage exactly one unconditional edge."),
                    ));
            }
        }
        Ok(())
    }

    fn check_write_owners(&self) -> Result<(), PipelineValidationError> {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for spec in self.ordered_specs() {
            for key in &spec.contract().writes {
                if let Some(owner) = owners.insert(key, spec.id()) {
                    return Err(PipelineValidationError::new(format!(
                        "Stages '{owner}' and '{}' both write '{key}'",
                        spec.id()
                    ))
                    .with_stages(vec![owner.to_string(), spec.id().to_string()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "GRAPH-007-WRITE_CONFLICT",
                            format!("Output key '{key}' has two writers"),
                        )
                        .with_context_entry("key", key.clone())
                        .with_fix_hint("Each output key must be produced by exactly one stage."),
                    ));
                }
            }
        }
        Ok(())
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for id in &self.stage_order {
            if !visited.contains(id.as_str()) {
                if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut on_path, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        if let Some(spec) = self.stages.get(node) {
            for next in spec.successors() {
                if on_path.contains(next) {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                if !visited.contains(next) {
                    if let Some(cycle) = self.dfs_cycle(next, visited, on_path, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }

    /// Kahn's algorithm; ties resolve in insertion order.
    fn topological_order(&self) -> Vec<String> {
        let position: HashMap<&str, usize> = self
            .stage_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = position.keys().map(|id| (*id, 0)).collect();
        for spec in self.ordered_specs() {
            let distinct: BTreeSet<&str> = spec.successors().collect();
            for next in distinct {
                if let Some(d) = in_degree.get_mut(next) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .filter_map(|(id, _)| position.get(id).copied())
            .collect();
        let mut order = Vec::with_capacity(self.stage_order.len());

        while let Some(idx) = ready.pop_first() {
            let id = self.stage_order[idx].as_str();
            order.push(id.to_string());
            if let Some(spec) = self.stages.get(id) {
                let distinct: BTreeSet<&str> = spec.successors().collect();
                for next in distinct {
                    if let Some(d) = in_degree.get_mut(next) {
                        *d -= 1;
                        if *d == 0 {
                            if let Some(p) = position.get(next) {
                                ready.insert(*p);
                            }
                        }
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Edge;
    use crate::stages::NoOpStage;
    use crate::testing::RecordingStage;
    use serde_json::json;

    fn noop(id: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(id))
    }

    fn code(err: &PipelineValidationError) -> &str {
        err.code().unwrap_or_default()
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert_eq!(code(&err), "GRAPH-001-EMPTY");
    }

    #[test]
    fn test_unknown_entry() {
        let err = PipelineBuilder::new("test")
            .linear(noop("a"), None)
            .unwrap()
            .entry("zzz")
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-002-NO_ENTRY");
    }

    #[test]
    fn test_unknown_target() {
        let err = PipelineBuilder::new("test")
            .linear(noop("a"), Some("missing"))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-003-UNKNOWN_TARGET");
        assert_eq!(err.stages, vec!["a", "missing"]);
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PipelineBuilder::new("test")
            .linear(noop("a"), None)
            .unwrap()
            .linear(noop("a"), None)
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-004-DUPLICATE");
    }

    #[test]
    fn test_guarded_edges_need_fallback() {
        let err = PipelineBuilder::new("test")
            .stage(StageSpec::new(noop("a")).with_edge(Edge::to("b").when_flag("f")))
            .unwrap()
            .linear(noop("b"), None)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-005-NO_FALLBACK");

        let err = PipelineBuilder::new("test")
            .stage(StageSpec::new(noop("a")).then("b").then("c"))
            .unwrap()
            .linear(noop("b"), None)
            .unwrap()
            .linear(noop("c"), None)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-005-NO_FALLBACK");
    }

    #[test]
    fn test_cycle_detection() {
        let err = PipelineBuilder::new("test")
            .linear(noop("a"), Some("b"))
            .unwrap()
            .linear(noop("b"), Some("c"))
            .unwrap()
            .linear(noop("c"), Some("a"))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-006-CYCLE");
        assert_eq!(err.stages, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let err = PipelineBuilder::new("test")
            .linear(noop("a"), Some("a"))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-006-CYCLE");
    }

    #[test]
    fn test_write_conflict() {
        let err = PipelineBuilder::new("test")
            .linear(Arc::new(RecordingStage::new("a").writes("k", json!(1))), Some("b"))
            .unwrap()
            .linear(Arc::new(RecordingStage::new("b").writes("k", json!(2))), None)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-007-WRITE_CONFLICT");
    }

    #[test]
    fn test_topological_order_with_branch() {
        // Insertion order deliberately puts plan before critique.
        let graph = PipelineBuilder::new("test")
            .linear(noop("synthesize"), Some("critique"))
            .unwrap()
            .linear(noop("plan"), None)
            .unwrap()
            .linear(noop("critique"), Some("plan"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.order(), ["synthesize", "critique", "plan"]);
        assert_eq!(graph.ordinal("plan"), Some(2));
        assert_eq!(graph.entry(), "synthesize");
    }
}
