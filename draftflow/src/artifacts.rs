//! Human-readable per-stage artifacts.
//!
//! After a stage's checkpoint is saved, the values it wrote can be dumped to
//! `<root>/<run_id>/<prefix>.json`, with a Markdown rendering of the same
//! value in `<prefix>.md`. Artifacts are a convenience for people reading a
//! run; the checkpoint store stays the durable record.

use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::errors::DraftflowError;
use crate::state::RunState;
use crate::utils::write_atomic;

/// Writes stage artifacts under a root directory, one folder per run.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    /// Creates a writer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding a run's artifacts.
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Returns the path of one artifact.
    #[must_use]
    pub fn path_for(&self, run_id: &str, prefix: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("{prefix}.json"))
    }

    /// Returns the path of an artifact's Markdown report.
    #[must_use]
    pub fn markdown_path_for(&self, run_id: &str, prefix: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("{prefix}.md"))
    }

    /// Writes the listed output keys of `state`, replacing any earlier files.
    ///
    /// A single key is written as its bare value; several keys are written as
    /// an object keyed by name. Absent keys are skipped. The Markdown report
    /// is written next to the JSON file; the JSON path is returned.
    pub fn write<'k>(
        &self,
        state: &RunState,
        prefix: &str,
        keys: impl IntoIterator<Item = &'k String>,
    ) -> Result<PathBuf, DraftflowError> {
        let mut selected: Map<String, Value> = keys
            .into_iter()
            .filter_map(|k| state.output(k).map(|v| (k.clone(), v.clone())))
            .collect();

        let body = if selected.len() == 1 {
            selected
                .values_mut()
                .next()
                .map(Value::take)
                .unwrap_or_default()
        } else {
            Value::Object(selected)
        };

        let path = self.path_for(state.run_id(), prefix);
        write_atomic(&path, &serde_json::to_vec_pretty(&body)?)?;
        write_atomic(
            &self.markdown_path_for(state.run_id(), prefix),
            render_markdown(prefix, &body).as_bytes(),
        )?;
        Ok(path)
    }
}

/// Renders an artifact value as a Markdown report.
///
/// A string value is taken to be a finished document and is returned as is.
/// Anything else gets a `# title` heading, one sub-heading per object key or
/// list element, and bullet lists for lists of scalars.
#[must_use]
pub fn render_markdown(title: &str, value: &Value) -> String {
    if let Value::String(text) = value {
        let mut doc = text.trim_end().to_string();
        doc.push('\n');
        return doc;
    }
    let mut out = format!("# {title}\n\n");
    render_section(&mut out, value, 2);
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

/// Deepest heading level; anything nested further is shown as JSON.
const MAX_HEADING: usize = 6;

fn render_section(out: &mut String, value: &Value, level: usize) {
    match value {
        Value::Object(map) if level <= MAX_HEADING => {
            for (key, field) in map {
                if let Some(text) = scalar_text(field) {
                    let _ = writeln!(out, "**{key}**: {text}\n");
                } else {
                    let _ = writeln!(out, "{} {key}\n", "#".repeat(level));
                    render_section(out, field, level + 1);
                }
            }
        }
        Value::Array(items) if items.iter().all(|i| scalar_text(i).is_some()) => {
            if items.is_empty() {
                out.push_str("_none_\n\n");
                return;
            }
            for text in items.iter().filter_map(scalar_text) {
                let _ = writeln!(out, "- {text}");
            }
            out.push('\n');
        }
        Value::Array(items) if level <= MAX_HEADING => {
            for (i, item) in items.iter().enumerate() {
                let _ = writeln!(out, "{} {}\n", "#".repeat(level), item_title(item, i + 1));
                render_section(out, item, level + 1);
            }
        }
        Value::Object(_) | Value::Array(_) => {
            let json = serde_json::to_string_pretty(value).unwrap_or_default();
            let _ = writeln!(out, "```json\n{json}\n```\n");
        }
        scalar => {
            if let Some(text) = scalar_text(scalar) {
                let _ = writeln!(out, "{text}\n");
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Null => Some("_none_".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Headings for list elements use a `title` or `name` field when present.
fn item_title(item: &Value, index: usize) -> String {
    ["title", "name"]
        .iter()
        .find_map(|field| item.get(field).and_then(Value::as_str))
        .map_or_else(|| format!("Item {index}"), |name| format!("{index}. {name}"))
}
