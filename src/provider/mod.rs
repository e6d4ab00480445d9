//! Cache providers
//!
//! Every backend implements `CacheProvider`. Backends are composed into one
//! logical cache with `CascadeProvider`:
//! - `LocalDirectoryProvider`: entries in a local or shared directory
//! - `RemoteObjectProvider`: entries mirrored to an S3-compatible bucket

mod cascade;
pub mod factory;
mod local;
mod remote;
#[cfg(test)]
mod testing;
mod transfer;

pub use cascade::CascadeProvider;
pub use factory::{build_cascade, build_cascade_with_object_store};
pub use local::LocalDirectoryProvider;
pub use remote::RemoteObjectProvider;
pub use transfer::Collaborators;

use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Abstract layer cache interface
///
/// `load` returns `Ok(None)` on a miss. An error never means "miss": it means
/// the backend could not tell, and callers must not treat it as safe to
/// rebuild and move on silently.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Warm-up hint before a build starts
    async fn populate_layer(&self, cancel: &CancellationToken, top_layer: &str) -> CacheResult<()>;

    /// Materialize the image cached under `key` in the image store and
    /// return its id
    async fn load(&self, cancel: &CancellationToken, key: &CacheKey) -> CacheResult<Option<String>>;

    /// Publish the image `image_id` from the image store under `key`
    async fn store(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
        image_id: &str,
    ) -> CacheResult<()>;

    /// Backend name for logs and errors
    fn name(&self) -> &'static str;
}

/// Abort before starting the next blocking step if the caller cancelled
pub(crate) fn ensure_active(cancel: &CancellationToken) -> CacheResult<()> {
    if cancel.is_cancelled() {
        Err(CacheError::Cancelled)
    } else {
        Ok(())
    }
}
