//! Small shared helpers: timestamps, run identifiers, hashing, atomic writes.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

/// Timestamp type used throughout the crate.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Builds a human-meaningful, sortable run identifier.
///
/// The format is `run_YYYYMMDD_HHMMSS_xxxxxxxx`. The suffix is taken from the
/// random tail of a UUIDv7 so two runs started within the same second in one
/// process still get distinct identifiers, while lexical order keeps
/// following start time.
#[must_use]
pub fn make_run_id() -> String {
    let stamp = Utc::now().format("run_%Y%m%d_%H%M%S");
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    let suffix = &uuid[uuid.len() - 8..];
    format!("{stamp}_{suffix}")
}

/// Truncates a string to at most `max_chars` characters.
///
/// Operates on `char` boundaries, so it never splits a multi-byte character.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes `bytes` to `path` through a temporary file in the same directory.
///
/// Readers see either the old file or the complete new one. Parent
/// directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
