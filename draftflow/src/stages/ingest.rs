//! Ingestion boundary: loads the initial input list from disk.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use tracing::info;

use super::{Stage, StageContext, StageContract};
use crate::core::{AuditEntry, StageOutput, StageResult};
use crate::errors::DraftflowError;

/// Config key naming the input file.
pub const INPUT_PATH_KEY: &str = "input_path";
/// Config key overriding the chunk heading pattern.
pub const CHUNK_PATTERN_KEY: &str = "chunk_pattern";

/// Loads a list of text chunks from the file named by the `input_path` config key.
///
/// A file whose content is a JSON array of strings is used as-is. Any other
/// file is split at each line matching the heading pattern; with no pattern,
/// or no match, the whole text is a single chunk.
#[derive(Debug, Clone)]
pub struct LoadChunksStage {
    id: String,
    output_key: String,
    contract: StageContract,
    heading_pattern: Option<String>,
}

impl LoadChunksStage {
    /// Creates the stage writing to `output_key`.
    #[must_use]
    pub fn new(id: impl Into<String>, output_key: impl Into<String>) -> Self {
        let output_key = output_key.into();
        Self {
            id: id.into(),
            contract: StageContract::new().writes([output_key.clone()]),
            output_key,
            heading_pattern: None,
        }
    }

    /// Sets the default heading pattern used when the config does not name one.
    #[must_use]
    pub fn with_heading_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.heading_pattern = Some(pattern.into());
        self
    }

    fn split(&self, stage: &str, text: &str, pattern: Option<&str>) -> Result<Vec<String>, DraftflowError> {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(text) {
            return Ok(list);
        }

        let Some(pattern) = pattern else {
            return Ok(single_chunk(text));
        };
        let re = Regex::new(&format!("(?m){pattern}")).map_err(|e| {
            DraftflowError::stage_execution(stage, format!("invalid chunk pattern: {e}"))
        })?;

        let starts: Vec<usize> = re.find_iter(text).map(|m| m.start()).collect();
        if starts.is_empty() {
            return Ok(single_chunk(text));
        }

        let mut chunks = Vec::with_capacity(starts.len());
        for (i, start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let chunk = text[*start..end].trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
        }
        Ok(chunks)
    }
}

fn single_chunk(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

#[async_trait]
impl Stage for LoadChunksStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let path = ctx.config_str(INPUT_PATH_KEY).ok_or_else(|| {
            DraftflowError::stage_execution(&self.id, format!("config key '{INPUT_PATH_KEY}' is not set"))
        })?;

        let text = tokio::fs::read_to_string(Path::new(path))
            .await
            .map_err(|e| DraftflowError::stage_execution(&self.id, format!("cannot read {path}: {e}")))?;

        let pattern = ctx
            .config_str(CHUNK_PATTERN_KEY)
            .or(self.heading_pattern.as_deref());
        let chunks = self.split(&self.id, &text, pattern)?;
        if chunks.is_empty() {
            return Err(DraftflowError::stage_execution(&self.id, format!("{path} contains no text")));
        }

        info!(stage = %self.id, path, chunks = chunks.len(), "Loaded input");

        let entry = AuditEntry::new(&self.id, "load_chunks")
            .with_input_summary(format!("{path} ({} chars)", text.chars().count()))
            .with_reasoning(format!("split into {} chunk(s)", chunks.len()));

        let mut output = StageOutput::ok_value(&self.output_key, serde_json::json!(chunks));
        output.record(entry, false);
        Ok(output)
    }
}
