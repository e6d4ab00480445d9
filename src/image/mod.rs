//! Image collaborators
//!
//! The cache never copies image content itself. It hands two addressable
//! locations to an external transfer engine, under a policy context obtained
//! from the trust subsystem. These traits are the seams to those systems:
//! - `ImageStore`: resolves image ids into references in the local store
//! - `ImageTransfer`: copies an image between two references
//! - `PolicyProvider` / `PolicyContext`: scoped transfer authorization

mod policy;

pub use policy::PolicyScope;

use crate::error::BoxError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// An addressable image location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Image held by the content-addressable image store
    Store { image_id: String },
    /// Cache entry directory (`imageID`, `manifest.json`, `blobs/`)
    Directory(PathBuf),
}

impl ImageReference {
    /// Reference to a cache entry directory
    pub fn directory(path: impl AsRef<Path>) -> Self {
        Self::Directory(path.as_ref().to_path_buf())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { image_id } => write!(f, "store:@{}", image_id),
            Self::Directory(path) => write!(f, "dir:{}", path.display()),
        }
    }
}

/// Settings forwarded to policy acquisition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContext {
    /// Signature policy file; the subsystem default when unset
    pub signature_policy_path: Option<PathBuf>,
    /// Registry authentication file
    pub auth_file: Option<PathBuf>,
}

/// Content-addressable image store
pub trait ImageStore: Send + Sync {
    /// Resolve an image id into a reference usable by the transfer engine
    fn resolve(&self, image_id: &str) -> Result<ImageReference, BoxError>;
}

/// Authorization object required by the transfer engine
pub trait PolicyContext: Send + Sync {
    /// Release the context. Called exactly once.
    fn release(&mut self) -> Result<(), BoxError>;
}

/// Trust subsystem handing out policy contexts
pub trait PolicyProvider: Send + Sync {
    /// Acquire a policy context for one cache operation
    fn acquire(&self, system: &SystemContext) -> Result<Box<dyn PolicyContext>, BoxError>;
}

/// Image transfer engine
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    /// Copy the image at `source` to `destination`
    async fn copy_image(
        &self,
        cancel: &CancellationToken,
        policy: &dyn PolicyContext,
        destination: &ImageReference,
        source: &ImageReference,
    ) -> Result<(), BoxError>;
}
