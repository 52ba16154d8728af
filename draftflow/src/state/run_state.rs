//! The mutable-by-scheduler-only state of one run.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{AuditLog, StageOutput};
use crate::errors::OwnershipConflictError;
use crate::utils::sha256_hex;

/// Configuration and output map of one run.
///
/// All maps are ordered so two equal states serialize to identical bytes.
/// The scheduler is the only writer: it applies a stage's output through
/// [`RunState::apply`], which enforces that an output key is only ever
/// rewritten by the stage that first produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    run_id: String,
    #[serde(default)]
    config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    owners: BTreeMap<String, String>,
    #[serde(default)]
    audit: AuditLog,
    #[serde(default)]
    completed: Vec<String>,
}

impl RunState {
    /// Creates the initial state of a run.
    #[must_use]
    pub fn new(run_id: impl Into<String>, config: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            ..Self::default()
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the configuration map.
    #[must_use]
    pub fn config(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.config
    }

    /// Returns a configuration value.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    /// Returns a configuration value as a string slice.
    #[must_use]
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns true if the configuration flag `key` is set to `true`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.config
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Sets a configuration value. Used for resume-time overrides.
    pub fn set_config(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.config.insert(key.into(), value);
    }

    /// Applies several configuration overrides.
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        self.config.extend(overrides);
    }

    /// Returns an output value.
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.outputs.get(key)
    }

    /// Decodes an output value into a typed record.
    pub fn output_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.outputs
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    /// Returns all outputs.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.outputs
    }

    /// Returns the stage that owns an output key.
    #[must_use]
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    /// Returns the audit log.
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Returns the stages completed so far, in completion order.
    #[must_use]
    pub fn completed_stages(&self) -> &[String] {
        &self.completed
    }

    /// Returns true if `stage` has completed in this state's lineage.
    #[must_use]
    pub fn has_completed(&self, stage: &str) -> bool {
        self.completed.iter().any(|s| s == stage)
    }

    /// Applies a stage's successful output.
    ///
    /// Nothing is written if any key is owned by a different stage.
    pub fn apply(&mut self, stage: &str, output: StageOutput) -> Result<(), OwnershipConflictError> {
        for key in output.delta.keys() {
            if let Some(owner) = self.owners.get(key) {
                if owner != stage {
                    return Err(OwnershipConflictError::new(key, owner.clone(), stage));
                }
            }
        }

        for (key, value) in output.delta {
            self.owners.insert(key.clone(), stage.to_string());
            self.outputs.insert(key, value);
        }
        self.audit.extend(output.audit);
        self.completed.retain(|s| s != stage);
        self.completed.push(stage.to_string());
        Ok(())
    }

    /// Returns the SHA-256 digest of the serialized outputs.
    ///
    /// Two states with the same outputs have the same digest.
    #[must_use]
    pub fn output_digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.outputs).unwrap_or_default();
        sha256_hex(&bytes)
    }

    /// Serializes the state.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a state.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
