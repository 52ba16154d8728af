//! The set of output writes a stage hands back to the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output key/value writes produced by one stage execution.
///
/// A delta is inert until the scheduler applies it to a
/// [`RunState`](super::RunState).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDelta {
    writes: BTreeMap<String, serde_json::Value>,
}

impl StateDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write and returns the delta.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.writes.insert(key.into(), value);
        self
    }

    /// Adds or replaces a write.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.writes.insert(key.into(), value);
    }

    /// Returns the value written for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.writes.get(key)
    }

    /// Iterates over written keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.writes.keys().map(String::as_str)
    }

    /// Iterates over writes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.writes.iter()
    }

    /// Returns the number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if the delta writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl IntoIterator for StateDelta {
    type Item = (String, serde_json::Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, serde_json::Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

impl FromIterator<(String, serde_json::Value)> for StateDelta {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}
