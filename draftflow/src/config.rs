//! File-based configuration for the `draftflow` binary.
//!
//! A `draftflow.toml` file is optional. A missing file yields the defaults;
//! a file that exists but does not parse is an error.
//!
//! ```toml
//! [run]
//! data_dir = ".draftflow"
//!
//! [backend]
//! base_url = "http://localhost:11434"
//! timeout_secs = 600
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 10000
//!
//! [models]
//! reader_model = "llama3"
//!
//! [flags]
//! skip_critique = false
//!
//! [params]
//! target_language = "Japanese"
//!
//! [prompts]
//! analyze = "..."
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::DraftflowError;
use crate::invoke::{RetryConfig, DEFAULT_CALL_TIMEOUT};
use crate::workflow::{
    WorkflowPrompts, READER_MODEL, SKIP_CRITIQUE, SKIP_RESEARCH, SKIP_TRANSLATE, TRANSLATOR_MODEL, WRITER_MODEL,
};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "draftflow.toml";

/// Where runs keep their state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Root for the checkpoint database and artifacts.
    pub data_dir: PathBuf,
    /// Checkpoint database file name, relative to `data_dir`.
    pub checkpoint_db: String,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".draftflow"),
            checkpoint_db: "checkpoints.db".to_string(),
        }
    }
}

impl RunSection {
    /// Returns the checkpoint database path.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(&self.checkpoint_db)
    }

    /// Returns the artifact root.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}

/// Generative backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Base URL of the backend.
    pub base_url: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
        }
    }
}

impl BackendSection {
    /// Returns the per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftflowConfig {
    /// Storage locations.
    pub run: RunSection,
    /// Backend endpoint.
    pub backend: BackendSection,
    /// Retry policy for generative calls.
    pub retry: RetryConfig,
    /// Model names by config key.
    pub models: BTreeMap<String, String>,
    /// Branch flags.
    pub flags: BTreeMap<String, bool>,
    /// Free-form template parameters.
    pub params: BTreeMap<String, Value>,
    /// Prompt templates.
    pub prompts: WorkflowPrompts,
}

impl Default for DraftflowConfig {
    fn default() -> Self {
        let models = [
            (READER_MODEL, "llama3"),
            (WRITER_MODEL, "qwen3-next"),
            (TRANSLATOR_MODEL, "translategemma:12b"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let flags = [(SKIP_CRITIQUE, false), (SKIP_RESEARCH, false), (SKIP_TRANSLATE, false)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let mut params = BTreeMap::new();
        params.insert("target_language".to_string(), Value::from("Japanese"));

        Self {
            run: RunSection::default(),
            backend: BackendSection::default(),
            retry: RetryConfig::default(),
            models,
            flags,
            params,
            prompts: WorkflowPrompts::default(),
        }
    }
}

impl DraftflowConfig {
    /// Loads configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DraftflowError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &Path) -> Result<Self, DraftflowError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(DraftflowError::Config(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        Self::from_toml(&content)
            .map_err(|e| DraftflowError::Config(format!("{}: {e}", path.display())))
    }

    /// Parses configuration from TOML text.
    ///
    /// Keys in `[models]`, `[flags]` and `[params]` are layered over the
    /// defaults, so a table naming one model keeps the others.
    ///
    /// # Errors
    ///
    /// Returns [`DraftflowError::Config`] if the text is not valid.
    pub fn from_toml(text: &str) -> Result<Self, DraftflowError> {
        let mut config: Self = toml::from_str(text).map_err(|e| DraftflowError::Config(e.to_string()))?;
        config.fill_defaults();
        Ok(config)
    }

    fn fill_defaults(&mut self) {
        let defaults = Self::default();
        for (key, model) in defaults.models {
            self.models.entry(key).or_insert(model);
        }
        for (key, flag) in defaults.flags {
            self.flags.entry(key).or_insert(flag);
        }
        for (key, value) in defaults.params {
            self.params.entry(key).or_insert(value);
        }
    }

    /// Flattens models, flags and params into the run configuration map.
    ///
    /// Params win over flags, flags over models, when keys collide.
    #[must_use]
    pub fn run_config(&self) -> BTreeMap<String, Value> {
        let mut config: BTreeMap<String, Value> = self
            .models
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        config.extend(self.flags.iter().map(|(k, v)| (k.clone(), Value::Bool(*v))));
        config.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        config
    }

    /// Run configuration for continuing an existing run.
    ///
    /// The configuration recorded in the run's checkpoint wins over the
    /// file, so a restart keeps the input and flags the run began with.
    #[must_use]
    pub fn resume_config(&self, recorded: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut config = self.run_config();
        config.extend(recorded.iter().map(|(k, v)| (k.clone(), v.clone())));
        config
    }
}

/// Parses a `KEY=VALUE` override.
///
/// The value is read as JSON when possible (`true`, `3`, `["a"]`) and as a
/// plain string otherwise.
///
/// # Errors
///
/// Returns [`DraftflowError::Config`] when there is no `=` or the key is empty.
pub fn parse_override(text: &str) -> Result<(String, Value), DraftflowError> {
    let (key, raw) = text
        .split_once('=')
        .ok_or_else(|| DraftflowError::Config(format!("override '{text}' is not KEY=VALUE")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(DraftflowError::Config(format!("override '{text}' has an empty key")));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((key.to_string(), value))
}
