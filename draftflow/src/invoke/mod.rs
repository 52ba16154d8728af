//! Resilient invocation of the generative backend.
//!
//! Two failure tiers meet here. Transport failures (no response at all) are
//! retried with bounded, non-decreasing backoff and become fatal only when
//! the attempt budget runs out. A response that did arrive is handed back
//! untouched, however malformed, so the caller can degrade instead of abort.

mod backend;
mod error;
#[cfg(feature = "ollama")]
mod ollama;
mod retry;
mod wrapper;

pub use backend::{CallOptions, GenerativeBackend};
pub use error::{InvocationError, TransportError};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaBackend, DEFAULT_BASE_URL};
pub use retry::{should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};
pub use wrapper::{Invocation, ResilientInvoker, DEFAULT_CALL_TIMEOUT};
