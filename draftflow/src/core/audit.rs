//! Audit trail of generative invocations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{now, Timestamp};

/// Classifies the error recorded on an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    /// No extraction strategy could interpret the response.
    ParseError,
    /// The response parsed but failed schema or shape checks.
    ValidationError,
    /// A stage-specific failure unrelated to the backend.
    StageError,
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError => write!(f, "parse_error"),
            Self::ValidationError => write!(f, "validation_error"),
            Self::StageError => write!(f, "stage_error"),
        }
    }
}

/// Error descriptor attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditError {
    /// Error class.
    pub tag: ErrorTag,
    /// Human-readable message.
    pub message: String,
}

impl AuditError {
    /// Creates a new audit error.
    #[must_use]
    pub fn new(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self {
            tag,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag, self.message)
    }
}

/// One record per external generative invocation or other significant action.
///
/// Entries are built with the `with_*` methods and become read-only once
/// appended to an [`AuditLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was created.
    pub timestamp: Timestamp,
    /// The stage that issued the action.
    pub stage: String,
    /// Action label, e.g. `analyze_chunks:3`.
    pub action: String,
    /// Short description of the input.
    #[serde(default)]
    pub input_summary: String,
    /// Full prompt sent to the backend.
    #[serde(default)]
    pub prompt: String,
    /// Full raw response received.
    #[serde(default)]
    pub raw_response: String,
    /// Extracted payload, if any.
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
    /// Error descriptor; `None` on success.
    #[serde(default)]
    pub error: Option<AuditError>,
    /// Free-text reasoning or summary.
    #[serde(default)]
    pub reasoning: String,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(stage: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: now(),
            stage: stage.into(),
            action: action.into(),
            input_summary: String::new(),
            prompt: String::new(),
            raw_response: String::new(),
            parsed: None,
            error: None,
            reasoning: String::new(),
        }
    }

    /// Sets the input summary.
    #[must_use]
    pub fn with_input_summary(mut self, summary: impl Into<String>) -> Self {
        self.input_summary = summary.into();
        self
    }

    /// Sets the prompt text.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the raw response text.
    #[must_use]
    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = raw.into();
        self
    }

    /// Sets the parsed payload.
    #[must_use]
    pub fn with_parsed(mut self, parsed: Option<serde_json::Value>) -> Self {
        self.parsed = parsed;
        self
    }

    /// Sets the error descriptor.
    #[must_use]
    pub fn with_error(mut self, error: AuditError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sets the reasoning text.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Returns true if the entry records an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns the error tag, if any.
    #[must_use]
    pub fn error_tag(&self) -> Option<ErrorTag> {
        self.error.as_ref().map(|e| e.tag)
    }
}

/// Append-only, chronologically ordered audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Entries cannot be modified afterwards.
    pub fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Appends several entries, preserving their order.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = AuditEntry>) {
        self.entries.extend(entries);
    }

    /// Returns all entries in append order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Iterates over entries in append order.
    pub fn iter(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    /// Iterates over the entries recorded by one stage.
    pub fn for_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a AuditEntry> + 'a {
        self.entries.iter().filter(move |e| e.stage == stage)
    }

    /// Counts entries carrying the given error tag.
    #[must_use]
    pub fn count_tagged(&self, tag: ErrorTag) -> usize {
        self.entries
            .iter()
            .filter(|e| e.error_tag() == Some(tag))
            .count()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::new("analyze_chunks", "analyze_chunks:1")
            .with_input_summary("chunk 1: 120 chars")
            .with_prompt("prompt")
            .with_raw_response("{}")
            .with_parsed(Some(serde_json::json!({})))
            .with_reasoning("ok");

        assert_eq!(entry.stage, "analyze_chunks");
        assert!(!entry.is_error());
        assert_eq!(entry.error_tag(), None);
    }

    #[test]
    fn test_log_preserves_order_and_filters() {
        let mut log = AuditLog::new();
        log.append(AuditEntry::new("a", "a:1"));
        log.append(
            AuditEntry::new("b", "b:1")
                .with_error(AuditError::new(ErrorTag::ParseError, "no payload")),
        );
        log.extend(vec![AuditEntry::new("a", "a:2")]);

        let actions: Vec<_> = log.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["a:1", "b:1", "a:2"]);
        assert_eq!(log.for_stage("a").count(), 2);
        assert_eq!(log.count_tagged(ErrorTag::ParseError), 1);
        assert_eq!(log.count_tagged(ErrorTag::ValidationError), 0);
    }

    #[test]
    fn test_error_tag_serialization() {
        let json = serde_json::to_string(&ErrorTag::ValidationError).unwrap();
        assert_eq!(json, r#""validation_error""#);
        assert_eq!(ErrorTag::ParseError.to_string(), "parse_error");
        assert_eq!(ErrorTag::StageError.to_string(), "stage_error");
        // Transport failures halt the stage; they are never audited.
        assert!(serde_json::from_str::<ErrorTag>(r#""transport_error""#).is_err());
    }

    #[test]
    fn test_log_serializes_as_array() {
        let mut log = AuditLog::new();
        log.append(AuditEntry::new("a", "a:1"));
        let value = serde_json::to_value(&log).unwrap();
        assert!(value.is_array());
    }
}
