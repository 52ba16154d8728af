//! Execution context lent to a stage.

use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::StageContract;
use crate::core::{AuditEntry, AuditError, ErrorTag};
use crate::errors::{DraftflowError, UndeclaredDependencyError};
use crate::extract::{extract, SchemaValidator};
use crate::invoke::{CallOptions, ResilientInvoker};
use crate::state::RunState;

/// One generative call issued by a stage.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Action label recorded in the audit entry.
    pub action: String,
    /// Full prompt text.
    pub prompt: String,
    /// Backend options.
    pub options: CallOptions,
    /// Short description of the input for the audit log.
    pub input_summary: String,
}

impl GenerationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(action: impl Into<String>, prompt: impl Into<String>, options: CallOptions) -> Self {
        Self {
            action: action.into(),
            prompt: prompt.into(),
            options,
            input_summary: String::new(),
        }
    }

    /// Sets the input summary.
    #[must_use]
    pub fn with_input_summary(mut self, summary: impl Into<String>) -> Self {
        self.input_summary = summary.into();
        self
    }
}

/// How a response is turned into a value, and what replaces it on failure.
#[derive(Clone)]
pub enum OutputMode {
    /// Extract a JSON payload, optionally validated.
    Json {
        /// Validator applied to the parsed payload.
        validator: Option<Arc<dyn SchemaValidator>>,
        /// Value used when extraction fails.
        default: serde_json::Value,
    },
    /// Use the trimmed response text as a string value.
    Text {
        /// Value used when the response is empty.
        default: serde_json::Value,
    },
}

impl OutputMode {
    /// JSON mode without a validator.
    #[must_use]
    pub fn json(default: serde_json::Value) -> Self {
        Self::Json {
            validator: None,
            default,
        }
    }

    /// JSON mode with a validator.
    #[must_use]
    pub fn validated(validator: Arc<dyn SchemaValidator>, default: serde_json::Value) -> Self {
        Self::Json {
            validator: Some(validator),
            default,
        }
    }

    /// Text mode.
    #[must_use]
    pub fn text(default: serde_json::Value) -> Self {
        Self::Text { default }
    }

    /// Returns the fallback value.
    #[must_use]
    pub fn default_value(&self) -> &serde_json::Value {
        match self {
            Self::Json { default, .. } | Self::Text { default } => default,
        }
    }
}

impl fmt::Debug for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json { validator, default } => f
                .debug_struct("Json")
                .field("validated", &validator.is_some())
                .field("default", default)
                .finish(),
            Self::Text { default } => f.debug_struct("Text").field("default", default).finish(),
        }
    }
}

/// The value a generative sub-call produced, possibly a substituted default.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// The value to use.
    pub value: serde_json::Value,
    /// The audit entry describing the call.
    pub entry: AuditEntry,
    /// True if `value` is the fallback default.
    pub degraded: bool,
}

/// Read-only view of the run state for one stage execution.
///
/// Output keys outside the stage's declared reads are refused. Configuration
/// is always readable.
pub struct StageContext<'a> {
    stage_id: &'a str,
    contract: &'a StageContract,
    state: &'a RunState,
    invoker: Option<&'a ResilientInvoker>,
}

impl<'a> StageContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(stage_id: &'a str, contract: &'a StageContract, state: &'a RunState) -> Self {
        Self {
            stage_id,
            contract,
            state,
            invoker: None,
        }
    }

    /// Attaches the invoker used by [`generate`](Self::generate).
    #[must_use]
    pub fn with_invoker(mut self, invoker: Option<&'a ResilientInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Returns the executing stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        self.stage_id
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.state.run_id()
    }

    /// Returns the stage's contract.
    #[must_use]
    pub fn contract(&self) -> &StageContract {
        self.contract
    }

    /// Returns a declared input, if present.
    pub fn input_opt(&self, key: &str) -> Result<Option<&'a serde_json::Value>, DraftflowError> {
        if !self.contract.can_read(key) {
            return Err(UndeclaredDependencyError::new(self.stage_id, key).into());
        }
        Ok(self.state.output(key))
    }

    /// Returns a declared input that must be present.
    pub fn input(&self, key: &str) -> Result<&'a serde_json::Value, DraftflowError> {
        self.input_opt(key)?.ok_or_else(|| DraftflowError::MissingInput {
            stage: self.stage_id.to_string(),
            key: key.to_string(),
        })
    }

    /// Decodes a declared input into a typed record.
    pub fn input_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, DraftflowError> {
        let value = self.input(key)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Returns a configuration value.
    #[must_use]
    pub fn config(&self, key: &str) -> Option<&'a serde_json::Value> {
        self.state.config_value(key)
    }

    /// Returns a configuration string.
    #[must_use]
    pub fn config_str(&self, key: &str) -> Option<&'a str> {
        self.state.config_str(key)
    }

    /// Returns a configuration flag.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.state.flag(key)
    }

    /// Returns the run state's configuration map.
    #[must_use]
    pub fn config_map(&self) -> &'a std::collections::BTreeMap<String, serde_json::Value> {
        self.state.config()
    }

    /// Returns the invoker, or an error if none is configured.
    pub fn invoker(&self) -> Result<&'a ResilientInvoker, DraftflowError> {
        self.invoker.ok_or_else(|| DraftflowError::NoBackend {
            stage: self.stage_id.to_string(),
        })
    }

    /// Invokes the backend, interprets the response and builds an audit entry.
    ///
    /// Malformed responses degrade to the mode's default. Only transport
    /// exhaustion, rejection or cancellation return `Err`.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        mode: &OutputMode,
    ) -> Result<Generated, DraftflowError> {
        let invoker = self.invoker()?;
        let invocation = invoker.invoke(&request.prompt, &request.options).await?;

        let entry = AuditEntry::new(self.stage_id, &request.action)
            .with_input_summary(request.input_summary)
            .with_prompt(request.prompt)
            .with_raw_response(invocation.raw.clone())
            .with_reasoning(format!(
                "model {} answered after {} attempt(s) in {} ms",
                request.options.model, invocation.attempts, invocation.elapsed_ms
            ));

        let (value, error) = match mode {
            OutputMode::Json { validator, default } => {
                let outcome = extract(&invocation.raw, validator.as_deref());
                match (outcome.success, outcome.payload, outcome.error) {
                    (true, Some(payload), _) => (payload, None),
                    (_, _, Some(err)) => (default.clone(), Some(AuditError::from(&err))),
                    (_, _, None) => (
                        default.clone(),
                        Some(AuditError::new(ErrorTag::ParseError, "no payload extracted")),
                    ),
                }
            }
            OutputMode::Text { default } => {
                let text = invocation.raw.trim();
                if text.is_empty() {
                    (
                        default.clone(),
                        Some(AuditError::new(ErrorTag::ParseError, "empty response")),
                    )
                } else {
                    (serde_json::Value::String(text.to_string()), None)
                }
            }
        };

        Ok(match error {
            Some(err) => {
                warn!(
                    stage = self.stage_id,
                    action = %request.action,
                    error = %err,
                    "Sub-call degraded to default"
                );
                Generated {
                    value,
                    entry: entry.with_error(err),
                    degraded: true,
                }
            }
            None => Generated {
                entry: entry.with_parsed(Some(value.clone())),
                value,
                degraded: false,
            },
        })
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("stage_id", &self.stage_id)
            .field("run_id", &self.state.run_id())
            .field("has_invoker", &self.invoker.is_some())
            .finish()
    }
}
