//! Cache entry manifest parsing
//!
//! Each entry carries a `manifest.json` naming the image's config blob and
//! its ordered layers. Only the fields the cache needs are modeled.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parsed `manifest.json`
///
/// Only `layers` is validated. Older entries record `schemaVersion` as a
/// string and `config` as a bare digest, so both accept either shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,

    /// Image configuration blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigRef>,

    /// Layer blobs, base layer first
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Reference to a blob by digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,

    /// `<algorithm>:<encoded>`, e.g. `sha256:0011...`
    pub digest: String,

    #[serde(default)]
    pub size: u64,
}

/// `schemaVersion` as written by either manifest generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaVersion {
    Number(u64),
    Text(String),
}

/// Config reference: a full descriptor or just its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigRef {
    Descriptor(Descriptor),
    Digest(String),
}

impl ConfigRef {
    pub fn digest(&self) -> &str {
        match self {
            Self::Descriptor(descriptor) => &descriptor.digest,
            Self::Digest(digest) => digest,
        }
    }
}

impl Manifest {
    /// Parse a manifest from a file on disk
    pub async fn from_file(path: &Path, key: &str) -> CacheResult<Self> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::io(format!("reading manifest {}", path.display()), e))?;
        Self::parse(&content, key)
    }

    /// Parse a manifest from JSON bytes; `key` is used for error context
    pub fn parse(content: &[u8], key: &str) -> CacheResult<Self> {
        serde_json::from_slice(content)
            .map_err(|e| CacheError::manifest_invalid(key, e.to_string()))
    }

    /// Blob file names of every layer, in manifest order
    pub fn layer_blob_names(&self, key: &str) -> CacheResult<Vec<&str>> {
        self.layers
            .iter()
            .map(|layer| {
                blob_name(&layer.digest).ok_or_else(|| {
                    CacheError::manifest_invalid(
                        key,
                        format!(
                            "layer digest {:?} is not of the form <algorithm>:<hex>",
                            layer.digest
                        ),
                    )
                })
            })
            .collect()
    }

    /// Whether the manifest's config descriptor points at blob `name`
    pub fn references_config(&self, name: &str) -> bool {
        self.config
            .as_ref()
            .and_then(|config| blob_name(config.digest()))
            .is_some_and(|config| config == name)
    }
}

/// Local blob file name for a digest: the digest without its algorithm
/// prefix. `None` when the digest has no algorithm, no encoded part, or an
/// encoded part that is not a single path segment.
pub fn blob_name(digest: &str) -> Option<&str> {
    let (algorithm, encoded) = digest.split_once(':')?;
    (!algorithm.is_empty() && is_path_segment(encoded)).then_some(encoded)
}

/// Blob file name of an image's config blob. Image stores report ids either
/// as full digests or as the bare encoded part.
pub fn image_blob_name(image_id: &str) -> Option<&str> {
    if image_id.contains(':') {
        blob_name(image_id)
    } else {
        is_path_segment(image_id).then_some(image_id)
    }
}

fn is_path_segment(encoded: &str) -> bool {
    !encoded.is_empty()
        && encoded.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '.'))
        && encoded != "."
        && encoded != ".."
}
