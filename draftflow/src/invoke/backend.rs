//! The generative backend boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::TransportError;

/// Per-call options passed to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Context window size in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    /// Ask the backend for JSON output.
    #[serde(default)]
    pub structured: bool,
    /// Upper bound on generated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output: Option<u32>,
}

impl CallOptions {
    /// Creates options for a model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the context window.
    #[must_use]
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Requests structured (JSON) output.
    #[must_use]
    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    /// Sets the output token limit.
    #[must_use]
    pub fn with_max_output(mut self, tokens: u32) -> Self {
        self.max_output = Some(tokens);
        self
    }
}

/// A generative-inference service.
///
/// Returns the raw response text, or a transport error when no response
/// was received. Content is never inspected here.
#[async_trait]
pub trait GenerativeBackend: Send + Sync + Debug {
    /// Returns a short backend name for logs.
    fn name(&self) -> &str;

    /// Sends one prompt and returns the raw response text.
    async fn generate(&self, prompt: &str, options: &CallOptions) -> Result<String, TransportError>;
}
