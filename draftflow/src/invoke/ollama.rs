//! HTTP backend for an Ollama-compatible `/api/generate` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallOptions, GenerativeBackend, TransportError};
use crate::errors::DraftflowError;

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Non-streaming client for the Ollama generate API.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    /// Creates a backend for `base_url` with a transport-level timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DraftflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DraftflowError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request<'a>(prompt: &'a str, options: &'a CallOptions) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &options.model,
            prompt,
            stream: false,
            format: options.structured.then_some("json"),
            options: GenerateOptions {
                temperature: options.temperature,
                num_ctx: options.context_window,
                num_predict: options.max_output,
            },
        }
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::ConnectionRefused(err.to_string())
    } else {
        TransportError::Unavailable(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> TransportError {
    let message = format!("HTTP {status}: {body}");
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        TransportError::Unavailable(message)
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT {
        TransportError::Timeout(message)
    } else {
        TransportError::Rejected(message)
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, options: &CallOptions) -> Result<String, TransportError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&Self::build_request(prompt, options))
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| classify(&e))?;
        Ok(body.response)
    }
}
