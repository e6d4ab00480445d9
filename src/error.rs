//! Error types for buildcache
//!
//! All modules use `CacheResult<T>` as their return type. A cache miss is
//! never an error: providers report it as `Ok(None)`.

use crate::objectstore::ObjectStoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Boxed error returned by external collaborators (transfer engine,
/// policy subsystem, image store)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can occur in buildcache
#[derive(Error, Debug)]
pub enum CacheError {
    // Key errors
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    // Transfer errors
    #[error("Failed to transfer image for {key} ({backend}): {source}")]
    Transfer {
        backend: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to resolve image {image_id} in the image store: {source}")]
    ImageReference {
        image_id: String,
        #[source]
        source: BoxError,
    },

    // Synchronization errors
    #[error("Failed to list remote objects for {key}: {source}")]
    RemoteList {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Failed to download {object} for {key}: {source}")]
    Download {
        key: String,
        object: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Downloaded empty object {object} for {key}, cache entry is incomplete")]
    EmptyBlob { key: String, object: String },

    #[error("Remote entry for {key} is unusable: {reason}")]
    SyncIncomplete { key: String, reason: String },

    #[error("Malformed manifest for {key}: {reason}")]
    ManifestInvalid { key: String, reason: String },

    // Upload errors
    #[error("Failed to upload {object} for {key}: {source}")]
    Upload {
        key: String,
        object: String,
        #[source]
        source: ObjectStoreError,
    },

    // Resource errors
    #[error("Failed to acquire policy context: {0}")]
    PolicyAcquire(#[source] BoxError),

    #[error("Failed to release policy context: {0}")]
    PolicyRelease(#[source] BoxError),

    #[error("{primary}; additionally failed to release policy context: {release}")]
    PolicyReleaseAfter {
        primary: Box<CacheError>,
        release: BoxError,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Failed to set up the {backend} backend: {source}")]
    BackendSetup {
        backend: &'static str,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a synchronization failure for an entry that cannot be used
    pub fn sync_incomplete(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SyncIncomplete {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-manifest error
    pub fn manifest_invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Fold a policy-context release failure into this error without
    /// discarding it
    pub fn with_release_failure(self, release: BoxError) -> Self {
        Self::PolicyReleaseAfter {
            primary: Box::new(self),
            release,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteList { source, .. }
            | Self::Download { source, .. }
            | Self::Upload { source, .. } => source.is_retryable(),
            Self::PolicyReleaseAfter { primary, .. } => primary.is_retryable(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::EmptyBlob { .. } | Self::SyncIncomplete { .. } | Self::ManifestInvalid { .. } => {
                Some("The remote cache entry is broken; rebuild the layer and store it again")
            }
            Self::RemoteList { source, .. }
            | Self::Upload { source, .. }
            | Self::BackendSetup { source, .. } => source.hint(),
            Self::PolicyAcquire(_) => Some("Check signature_policy_path in the [system] config"),
            _ => None,
        }
    }
}
