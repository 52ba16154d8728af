//! Tracing subscriber setup for the binary.
//!
//! The library itself only emits `tracing` events and spans; installing a
//! subscriber is left to the process that embeds it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber, writing to stderr.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever test installs first wins; the next attempt must fail.
        let _ = init_tracing(LogFormat::Plain);
        assert!(init_tracing(LogFormat::Json).is_err());
    }

    #[test]
    fn test_log_format_parses_from_cli_value() {
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Plain);
    }
}
