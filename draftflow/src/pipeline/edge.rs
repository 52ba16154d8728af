//! Edges between stages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::RunState;

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Another stage.
    Stage(String),
    /// The end of the run.
    End,
}

impl Target {
    /// Returns the stage id, or `None` for the end.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage(id) => Some(id),
            Self::End => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(id) => f.write_str(id),
            Self::End => f.write_str("END"),
        }
    }
}

/// A predicate over the run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Holds when the flag is set to `true`.
    FlagSet(String),
    /// Holds when the flag is absent or not `true`.
    FlagUnset(String),
}

impl Guard {
    /// Evaluates the guard.
    #[must_use]
    pub fn matches(&self, state: &RunState) -> bool {
        match self {
            Self::FlagSet(key) => state.flag(key),
            Self::FlagUnset(key) => !state.flag(key),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlagSet(key) => write!(f, "{key}"),
            Self::FlagUnset(key) => write!(f, "!{key}"),
        }
    }
}

/// An outgoing edge. Without a guard it is the stage's unconditional edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Destination.
    pub target: Target,
    /// Condition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

impl Edge {
    /// An unconditional edge to a stage.
    #[must_use]
    pub fn to(stage: impl Into<String>) -> Self {
        Self {
            target: Target::Stage(stage.into()),
            guard: None,
        }
    }

    /// An unconditional edge to the end of the run.
    #[must_use]
    pub fn end() -> Self {
        Self {
            target: Target::End,
            guard: None,
        }
    }

    /// Taken only when `flag` is set.
    #[must_use]
    pub fn when_flag(mut self, flag: impl Into<String>) -> Self {
        self.guard = Some(Guard::FlagSet(flag.into()));
        self
    }

    /// Taken only when `flag` is not set.
    #[must_use]
    pub fn unless_flag(mut self, flag: impl Into<String>) -> Self {
        self.guard = Some(Guard::FlagUnset(flag.into()));
        self
    }

    /// Returns true if the edge has a guard.
    #[must_use]
    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.guard {
            Some(guard) => write!(f, "({guard}) -> {}", self.target),
            None => write!(f, "-> {}", self.target),
        }
    }
}

/// Picks the edge to follow: the first guarded edge that holds, otherwise
/// the unconditional edge. `None` means the stage has no way forward and the
/// run ends.
#[must_use]
pub fn select_edge<'e>(edges: &'e [Edge], state: &RunState) -> Option<&'e Edge> {
    edges
        .iter()
        .filter(|e| e.guard.as_ref().is_some_and(|g| g.matches(state)))
        .chain(edges.iter().filter(|e| e.guard.is_none()))
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn state(flags: &[(&str, bool)]) -> RunState {
        let config: BTreeMap<_, _> = flags
            .iter()
            .map(|(k, v)| ((*k).to_string(), json!(v)))
            .collect();
        RunState::new("r", config)
    }

    #[test]
    fn test_guarded_edge_wins_when_it_holds() {
        let edges = vec![Edge::to("critique"), Edge::to("plan").when_flag("skip_critique")];

        let chosen = select_edge(&edges, &state(&[("skip_critique", true)])).unwrap();
        assert_eq!(chosen.target, Target::Stage("plan".into()));

        let chosen = select_edge(&edges, &state(&[])).unwrap();
        assert_eq!(chosen.target, Target::Stage("critique".into()));
    }

    #[test]
    fn test_first_matching_guard_in_declaration_order() {
        let edges = vec![
            Edge::to("a").unless_flag("x"),
            Edge::to("b").unless_flag("y"),
            Edge::end(),
        ];
        let chosen = select_edge(&edges, &state(&[])).unwrap();
        assert_eq!(chosen.target.stage(), Some("a"));

        let chosen = select_edge(&edges, &state(&[("x", true), ("y", true)])).unwrap();
        assert_eq!(chosen.target, Target::End);
    }

    #[test]
    fn test_no_edges_means_end() {
        assert!(select_edge(&[], &state(&[])).is_none());
    }

    #[test]
    fn test_non_boolean_flag_is_unset() {
        let mut s = state(&[]);
        s.set_config("skip_translate", json!("yes"));
        assert!(Guard::FlagUnset("skip_translate".into()).matches(&s));
    }

    #[test]
    fn test_display() {
        assert_eq!(Edge::end().when_flag("skip_translate").to_string(), "(skip_translate) -> END");
        assert_eq!(Edge::to("plan").to_string(), "-> plan");
    }
}
