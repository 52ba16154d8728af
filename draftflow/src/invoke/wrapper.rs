//! Resilient wrapper around a generative backend.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::retry::{should_retry, RetryConfig, RetryDecision, RetryState};
use super::{CallOptions, GenerativeBackend, InvocationError, TransportError};
use crate::cancellation::CancellationToken;

/// Default caller-side bound on a single attempt.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// A completed generative call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The raw response text, unmodified.
    pub raw: String,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Wall-clock time spent, including backoff waits.
    pub elapsed_ms: u64,
}

enum AttemptError {
    Transport(TransportError),
    Cancelled(String),
}

/// Wraps a backend with retry, timeout and cancellation handling.
///
/// Only transport failures are retried. Any response that arrives is
/// returned as-is, however malformed; judging content is the caller's job.
#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    backend: Arc<dyn GenerativeBackend>,
    retry: RetryConfig,
    call_timeout: Duration,
    cancellation: Option<Arc<CancellationToken>>,
}

impl ResilientInvoker {
    /// Creates an invoker with the default retry schedule and timeout.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cancellation: None,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    /// Sends `prompt`, retrying transport failures per the retry policy.
    pub async fn invoke(
        &self,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<Invocation, InvocationError> {
        let started = Instant::now();
        let mut state = RetryState::new();

        loop {
            if let Some(reason) = self.cancel_reason() {
                return Err(InvocationError::Cancelled(reason));
            }

            let attempt = state.failures + 1;
            debug!(
                backend = self.backend.name(),
                model = %options.model,
                attempt,
                prompt_chars = prompt.len(),
                "Invoking generative backend"
            );

            let err = match self.attempt(prompt, options).await {
                Ok(raw) => {
                    return Ok(Invocation {
                        raw,
                        attempts: attempt,
                        elapsed_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                    });
                }
                Err(AttemptError::Cancelled(reason)) => {
                    return Err(InvocationError::Cancelled(reason));
                }
                Err(AttemptError::Transport(err)) => err,
            };

            match should_retry(&mut state, &self.retry, err.is_retryable()) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transport failure, retrying"
                    );
                    self.wait(delay).await?;
                }
                RetryDecision::GiveUp => {
                    error!(attempts = state.failures, error = %err, "Retries exhausted");
                    return Err(InvocationError::Exhausted {
                        attempts: state.failures,
                        last: err,
                    });
                }
                RetryDecision::NotRetryable => {
                    error!(error = %err, "Non-retryable transport failure");
                    return Err(InvocationError::NotRetryable(err));
                }
            }
        }
    }

    fn cancel_reason(&self) -> Option<String> {
        self.cancellation
            .as_ref()
            .filter(|t| t.is_cancelled())
            .map(|t| t.reason().unwrap_or_else(|| "cancelled".to_string()))
    }

    async fn until_cancelled(&self) -> String {
        match &self.cancellation {
            Some(token) => {
                token.cancelled().await;
                token.reason().unwrap_or_else(|| "cancelled".to_string())
            }
            None => std::future::pending().await,
        }
    }

    async fn attempt(&self, prompt: &str, options: &CallOptions) -> Result<String, AttemptError> {
        let call = tokio::time::timeout(self.call_timeout, self.backend.generate(prompt, options));
        tokio::select! {
            reason = self.until_cancelled() => Err(AttemptError::Cancelled(reason)),
            result = call => match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(err)) => Err(AttemptError::Transport(err)),
                Err(_) => Err(AttemptError::Transport(TransportError::Timeout(format!(
                    "no response within {}s",
                    self.call_timeout.as_secs_f64()
                )))),
            },
        }
    }

    async fn wait(&self, delay: Duration) -> Result<(), InvocationError> {
        tokio::select! {
            reason = self.until_cancelled() => Err(InvocationError::Cancelled(reason)),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_retry_invoker, ScriptedBackend};

    #[tokio::test]
    async fn test_success_first_try() {
        let backend = Arc::new(ScriptedBackend::new().respond("hello"));
        let invoker = fast_retry_invoker(backend.clone());

        let out = invoker.invoke("p", &CallOptions::new("m")).await.unwrap();
        assert_eq!(out.raw, "hello");
        assert_eq!(out.attempts, 1);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_makes_three_calls() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail(TransportError::ConnectionRefused("down".into()))
                .fail(TransportError::Unavailable("503".into()))
                .respond("{\"ok\": true}"),
        );
        let invoker = fast_retry_invoker(backend.clone());

        let out = invoker.invoke("p", &CallOptions::new("m")).await.unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_three_failures_is_exhausted() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail(TransportError::ConnectionRefused("a".into()))
                .fail(TransportError::ConnectionRefused("b".into()))
                .fail(TransportError::ConnectionRefused("c".into())),
        );
        let invoker = fast_retry_invoker(backend.clone());

        let err = invoker.invoke("p", &CallOptions::new("m")).await.unwrap_err();
        assert_eq!(
            err,
            InvocationError::Exhausted {
                attempts: 3,
                last: TransportError::ConnectionRefused("c".into()),
            }
        );
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new().respond("definitely not json"));
        let invoker = fast_retry_invoker(backend.clone());

        let out = invoker.invoke("p", &CallOptions::new("m")).await.unwrap();
        assert_eq!(out.raw, "definitely not json");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_is_fatal_immediately() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail(TransportError::Rejected("model not found".into()))
                .respond("never"),
        );
        let invoker = fast_retry_invoker(backend.clone());

        let err = invoker.invoke("p", &CallOptions::new("m")).await.unwrap_err();
        assert!(matches!(err, InvocationError::NotRetryable(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_caller_timeout_counts_as_transport_failure() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_latency(Duration::from_millis(200))
                .respond("late")
                .respond("late"),
        );
        let invoker = fast_retry_invoker(backend.clone())
            .with_retry(RetryConfig::new().with_max_attempts(2).with_base_delay_ms(1))
            .with_call_timeout(Duration::from_millis(20));

        let err = invoker.invoke("p", &CallOptions::new("m")).await.unwrap_err();
        match err {
            InvocationError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, TransportError::Timeout(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let token = Arc::new(CancellationToken::new());
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail(TransportError::Unavailable("503".into()))
                .respond("unused"),
        );
        let invoker = ResilientInvoker::new(backend.clone())
            .with_retry(RetryConfig::new().with_base_delay_ms(60_000))
            .with_cancellation(token.clone());

        let handle = tokio::spawn(async move { invoker.invoke("p", &CallOptions::new("m")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel("operator interrupt");

        let err = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, InvocationError::Cancelled("operator interrupt".into()));
        assert_eq!(backend.calls(), 1);
    }
}
