//! Test fixtures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::invoke::{GenerativeBackend, ResilientInvoker, RetryConfig};

/// An invoker with the default attempt budget but millisecond delays.
#[must_use]
pub fn fast_retry_invoker(backend: Arc<dyn GenerativeBackend>) -> ResilientInvoker {
    ResilientInvoker::new(backend)
        .with_retry(
            RetryConfig::new()
                .with_base_delay_ms(1)
                .with_max_delay_ms(5),
        )
        .with_call_timeout(Duration::from_secs(5))
}

/// Builds a run config map from key/value pairs.
#[must_use]
pub fn config_map(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
