//! Build-layer fingerprinting
//!
//! Derives the cache key for a layer that is about to be built from
//! everything that determines its content: the manifest type, the parent
//! layer, the image history so far, the next build instruction and the
//! digests of any content it adds. Same inputs = same key.

use crate::error::{CacheError, CacheResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Byte appended after each history entry
const RECORD_TERMINATOR: u8 = 0x1e;

/// Cache key identifying an equivalence class of build steps
///
/// Used verbatim as a directory name and as an object key prefix, so it
/// never contains path separators or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate a key received from elsewhere (configuration, callers, ...)
    pub fn new(key: impl Into<String>) -> CacheResult<Self> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("key is empty")
        } else if key == "." || key == ".." {
            Some("key is a relative path component")
        } else if key.contains(['/', '\\']) {
            Some("key contains a path separator")
        } else if key.chars().any(char::is_control) {
            Some("key contains a control character")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CacheError::InvalidKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// One entry of an image's build history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the step ran; normalized to UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Build instruction that produced the step
    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub comment: String,

    /// Whether the step produced no filesystem change
    #[serde(default)]
    pub empty_layer: bool,
}

/// Length-prefixed SHA-256 feed: a field can never be mistaken for a
/// boundary, whatever bytes it contains
struct KeyHasher(Sha256);

impl KeyHasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn field(&mut self, value: &str) {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value.as_bytes());
    }

    fn flag(&mut self, value: bool) {
        self.field(if value { "true" } else { "false" });
    }

    fn count(&mut self, count: usize) {
        self.0.update((count as u64).to_be_bytes());
    }

    fn end_record(&mut self) {
        self.0.update([RECORD_TERMINATOR]);
    }

    fn finish(self) -> CacheKey {
        CacheKey(hex::encode(self.0.finalize()))
    }
}

/// Canonical timestamp form: RFC 3339 in UTC with nanosecond precision
fn canonical_time(created: Option<&DateTime<Utc>>) -> String {
    created
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_default()
}

/// Calculate the cache key for a layer that is about to be built.
///
/// Every input contributes, including each digest in `digests`; element
/// order within `history` and `digests` is significant.
pub fn derive_key<D: AsRef<str>>(
    manifest_type: &str,
    build_adds_layer: bool,
    parent_layer_id: &str,
    history: &[HistoryEntry],
    next_created_by: &str,
    digests: &[D],
) -> CacheKey {
    let mut hasher = KeyHasher::new();

    hasher.field(manifest_type);
    hasher.flag(build_adds_layer);
    hasher.field(parent_layer_id);

    hasher.count(history.len());
    for entry in history {
        hasher.field(&canonical_time(entry.created.as_ref()));
        hasher.field(&entry.created_by);
        hasher.field(&entry.author);
        hasher.field(&entry.comment);
        hasher.flag(entry.empty_layer);
        hasher.end_record();
    }

    hasher.field(next_created_by);

    hasher.count(digests.len());
    for digest in digests {
        hasher.field(digest.as_ref());
    }

    hasher.finish()
}
