//! Structured-payload extraction from free-form model output.
//!
//! [`extract`] tries three candidate strategies in a fixed order and returns
//! the first candidate that parses as JSON:
//!
//! 1. a fenced block tagged `json` or `JSON`
//! 2. any fenced block, with an optional language tag on its first line removed
//! 3. the span from the first `{` to the last `}`
//!
//! A parsed candidate is then handed to an optional [`SchemaValidator`].
//! Extraction never panics and never returns `Err`: failures are reported in
//! the [`ExtractionOutcome`] as either a parse error or a validation error.

mod schema;

pub use schema::{FnValidator, RequiredFields, SchemaValidator, TypedSchema, ValidationError};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::core::{AuditError, ErrorTag};

const FENCE: &str = "```";

fn tagged_fence() -> Option<&'static Regex> {
    static TAGGED: OnceLock<Option<Regex>> = OnceLock::new();
    TAGGED
        .get_or_init(|| Regex::new(r"(?s)```[ \t]*(?:json|JSON)[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// The candidate strategy that produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// A fenced block tagged `json`.
    TaggedFence,
    /// Any fenced block.
    AnyFence,
    /// The first-`{` to last-`}` span.
    BraceSpan,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaggedFence => write!(f, "tagged_fence"),
            Self::AnyFence => write!(f, "any_fence"),
            Self::BraceSpan => write!(f, "brace_span"),
        }
    }
}

/// The class of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// No candidate could be interpreted as JSON.
    Parse,
    /// A candidate parsed but was rejected by the validator.
    Validation,
}

/// An extraction failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    /// Failure class.
    pub kind: ExtractionErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ExtractionError {
    fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Parse,
            message: message.into(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Validation,
            message: message.into(),
        }
    }

    /// Returns the audit tag for this failure.
    #[must_use]
    pub fn tag(&self) -> ErrorTag {
        match self.kind {
            ExtractionErrorKind::Parse => ErrorTag::ParseError,
            ExtractionErrorKind::Validation => ErrorTag::ValidationError,
        }
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExtractionErrorKind::Parse => write!(f, "JSON parse error: {}", self.message),
            ExtractionErrorKind::Validation => write!(f, "Validation error: {}", self.message),
        }
    }
}

impl From<&ExtractionError> for AuditError {
    fn from(err: &ExtractionError) -> Self {
        Self::new(err.tag(), err.to_string())
    }
}

/// The result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// True if a payload was parsed and validated.
    pub success: bool,
    /// The parsed payload. Present only on success.
    pub payload: Option<serde_json::Value>,
    /// The failure, if any.
    pub error: Option<ExtractionError>,
    /// The strategy whose candidate parsed, if any.
    pub strategy: Option<Strategy>,
}

impl ExtractionOutcome {
    fn ok(payload: serde_json::Value, strategy: Strategy) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            strategy: Some(strategy),
        }
    }

    /// Decodes a successful payload into a typed record.
    ///
    /// Returns `None` when extraction failed.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        if !self.success {
            return None;
        }
        self.payload
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
    }

    /// Returns the audit tag of the failure, if any.
    #[must_use]
    pub fn error_tag(&self) -> Option<ErrorTag> {
        self.error.as_ref().map(ExtractionError::tag)
    }
}

/// Yields candidates in strategy order.
fn candidates(raw: &str) -> Vec<(Strategy, &str)> {
    let mut out = Vec::new();

    if let Some(re) = tagged_fence() {
        for cap in re.captures_iter(raw) {
            if let Some(body) = cap.get(1) {
                out.push((Strategy::TaggedFence, body.as_str()));
            }
        }
    }

    // Segments at odd indices sit between an opening and a closing fence.
    let segments: Vec<&str> = raw.split(FENCE).collect();
    let closed = segments.len().saturating_sub(1) / 2;
    for i in 0..closed {
        out.push((Strategy::AnyFence, strip_language_tag(segments[2 * i + 1])));
    }

    if let (Some(first), Some(last)) = (raw.find('{'), raw.rfind('}')) {
        if last > first {
            out.push((Strategy::BraceSpan, &raw[first..=last]));
        }
    }

    out
}

fn strip_language_tag(block: &str) -> &str {
    let trimmed = block.trim_start_matches([' ', '\t']);
    match trimmed.split_once('\n') {
        Some((first, rest)) => {
            let tag = first.trim();
            let looks_like_tag = !tag.is_empty()
                && !tag.starts_with('{')
                && !tag.starts_with('[')
                && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if looks_like_tag {
                rest
            } else {
                block
            }
        }
        None => block,
    }
}

/// Extracts a structured payload from raw model output.
#[must_use]
pub fn extract(raw: &str, validator: Option<&dyn SchemaValidator>) -> ExtractionOutcome {
    let mut last_error: Option<String> = None;

    for (strategy, candidate) in candidates(raw) {
        let text = candidate.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(payload) => {
                if let Some(v) = validator {
                    if let Err(e) = v.validate(&payload) {
                        return ExtractionOutcome {
                            success: false,
                            payload: None,
                            error: Some(ExtractionError::validation(e.to_string())),
                            strategy: Some(strategy),
                        };
                    }
                }
                return ExtractionOutcome::ok(payload, strategy);
            }
            Err(e) => last_error = Some(format!("{strategy}: {e}")),
        }
    }

    let message = last_error.unwrap_or_else(|| "No JSON object found in response".to_string());
    ExtractionOutcome {
        success: false,
        payload: None,
        error: Some(ExtractionError::parse(message)),
        strategy: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tagged_fence_wins() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nand also {\"a\": 2}";
        let out = extract(raw, None);
        assert!(out.success);
        assert_eq!(out.strategy, Some(Strategy::TaggedFence));
        assert_eq!(out.payload, Some(json!({"a": 1})));
    }

    #[test]
    fn test_tagged_fence_beats_earlier_generic_fence() {
        let raw = "Plan {\"draft\": 0}\n```\n{\"a\": \"generic\"}\n```\nFinal:\n```json\n{\"a\": \"tagged\"}\n```";
        let out = extract(raw, None);
        assert!(out.success);
        assert_eq!(out.strategy, Some(Strategy::TaggedFence));
        assert_eq!(out.payload, Some(json!({"a": "tagged"})));
    }

    #[test]
    fn test_generic_fence_beats_preamble_brace() {
        let raw = "Notes {\"a\": \"preamble\"} then\n```\n{\"a\": \"fenced\"}\n```";
        let out = extract(raw, None);
        assert_eq!(out.strategy, Some(Strategy::AnyFence));
        assert_eq!(out.payload, Some(json!({"a": "fenced"})));
    }

    #[test]
    fn test_uppercase_tag() {
        let out = extract("```JSON\n[1, 2]\n```", None);
        assert_eq!(out.strategy, Some(Strategy::TaggedFence));
        assert_eq!(out.payload, Some(json!([1, 2])));
    }

    #[test]
    fn test_any_fence_strips_language_tag() {
        let raw = "```javascript\n{\"b\": true}\n```";
        let out = extract(raw, None);
        assert_eq!(out.strategy, Some(Strategy::AnyFence));
        assert_eq!(out.payload, Some(json!({"b": true})));
    }

    #[test]
    fn test_any_fence_without_tag() {
        let out = extract("```\n{\"c\": \"x\"}\n```", None);
        assert_eq!(out.strategy, Some(Strategy::AnyFence));
        assert_eq!(out.payload, Some(json!({"c": "x"})));
    }

    #[test]
    fn test_brace_span_fallback() {
        let raw = "Sure! The analysis is {\"concepts\": [\"being\"]} hope that helps";
        let out = extract(raw, None);
        assert_eq!(out.strategy, Some(Strategy::BraceSpan));
        assert_eq!(out.payload, Some(json!({"concepts": ["being"]})));
    }

    #[test]
    fn test_broken_fence_falls_through_to_brace_span() {
        let raw = "```json\n[not json\n```\nretry: {\"ok\": 1}";
        let out = extract(raw, None);
        assert!(out.success);
        assert_eq!(out.strategy, Some(Strategy::BraceSpan));
    }

    #[test]
    fn test_parse_error_when_nothing_parses() {
        let out = extract("I could not produce anything useful.", None);
        assert!(!out.success);
        assert!(out.payload.is_none());
        assert_eq!(out.error_tag(), Some(ErrorTag::ParseError));
    }

    #[test]
    fn test_validation_error_is_distinct() {
        let validator = RequiredFields::new(["episodes"]);
        let out = extract("{\"title\": \"no episodes\"}", Some(&validator));
        assert!(!out.success);
        assert_eq!(out.error_tag(), Some(ErrorTag::ValidationError));
        assert!(out.payload.is_none());
        assert_eq!(out.strategy, Some(Strategy::BraceSpan));
        assert!(out.error.unwrap().to_string().starts_with("Validation error"));
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Plan {
            episodes: Vec<u32>,
        }
        let out = extract("{\"episodes\": [1, 2]}", None);
        let plan: Plan = out.decode().unwrap().unwrap();
        assert_eq!(plan, Plan { episodes: vec![1, 2] });

        let failed = extract("nothing", None);
        assert!(failed.decode::<Plan>().is_none());
    }

    #[test]
    fn test_never_panics_on_adversarial_input() {
        let inputs = [
            "",
            "```",
            "``````",
            "```json",
            "}{",
            "{",
            "}",
            "```json\n```",
            "\u{1F600}{\u{00E9}}\u{1F600}",
            "{\"a\": \"\u{00E9}\"",
            "```\u{00E9}\n{}\n```",
            "\0\0\0",
        ];
        for input in inputs {
            let _ = extract(input, None);
            let _ = extract(input, Some(&RequiredFields::new(["x"])));
        }
    }

    #[test]
    fn test_audit_error_conversion() {
        let out = extract("nope", None);
        let audit: AuditError = out.error.as_ref().unwrap().into();
        assert_eq!(audit.tag, ErrorTag::ParseError);
    }
}
