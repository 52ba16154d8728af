//! Declared reads and writes of a stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The output keys a stage may read and the keys it may write.
///
/// Configuration keys are always readable and are not declared here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContract {
    /// Output keys the stage reads.
    #[serde(default)]
    pub reads: BTreeSet<String>,
    /// Output keys the stage writes.
    #[serde(default)]
    pub writes: BTreeSet<String>,
}

impl StageContract {
    /// Creates an empty contract.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds declared reads.
    #[must_use]
    pub fn reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds declared writes.
    #[must_use]
    pub fn writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Returns true if `key` is a declared read.
    #[must_use]
    pub fn can_read(&self, key: &str) -> bool {
        self.reads.contains(key)
    }

    /// Returns true if `key` is a declared write.
    #[must_use]
    pub fn can_write(&self, key: &str) -> bool {
        self.writes.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_builder() {
        let contract = StageContract::new()
            .reads(["concept_graph", "critique_report"])
            .writes(["syllabus"]);

        assert!(contract.can_read("critique_report"));
        assert!(!contract.can_read("syllabus"));
        assert!(contract.can_write("syllabus"));
        assert_eq!(contract.reads.len(), 2);
    }
}
