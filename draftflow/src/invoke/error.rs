//! Transport and invocation errors.

use thiserror::Error;

/// A failure to obtain any response from the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The backend refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The backend is temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request itself; retrying cannot help.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// A generative call that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// Every attempt failed with a retryable transport error.
    #[error("Generative call failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The last transport error seen.
        last: TransportError,
    },

    /// A non-retryable transport error occurred.
    #[error("Generative call failed: {0}")]
    NotRetryable(TransportError),

    /// The run was cancelled while waiting.
    #[error("Generative call cancelled: {0}")]
    Cancelled(String),
}

impl InvocationError {
    /// Returns the transport error behind this failure, if any.
    #[must_use]
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::NotRetryable(err) => Some(err),
            Self::Cancelled(_) => None,
        }
    }
}
