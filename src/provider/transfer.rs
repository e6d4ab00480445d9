//! Moving images between the image store and entry directories
//!
//! Both backends materialize and capture images the same way; only where the
//! entry directory comes from differs.

use super::ensure_active;
use crate::entry::EntryDir;
use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use crate::image::{
    ImageReference, ImageStore, ImageTransfer, PolicyProvider, PolicyScope, SystemContext,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handles to the systems a backend delegates image copies to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ImageStore>,
    pub transfer: Arc<dyn ImageTransfer>,
    pub policy: Arc<dyn PolicyProvider>,
    pub system: SystemContext,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn ImageStore>,
        transfer: Arc<dyn ImageTransfer>,
        policy: Arc<dyn PolicyProvider>,
        system: SystemContext,
    ) -> Self {
        Self {
            store,
            transfer,
            policy,
            system,
        }
    }

    /// Copy the image held in `entry` into the image store and return its id
    pub(crate) async fn import(
        &self,
        cancel: &CancellationToken,
        backend: &'static str,
        key: &CacheKey,
        entry: &EntryDir,
    ) -> CacheResult<String> {
        let scope = PolicyScope::acquire(self.policy.as_ref(), &self.system)?;
        let result = self.import_scoped(cancel, backend, key, entry, &scope).await;
        scope.finish(result)
    }

    async fn import_scoped(
        &self,
        cancel: &CancellationToken,
        backend: &'static str,
        key: &CacheKey,
        entry: &EntryDir,
        scope: &PolicyScope,
    ) -> CacheResult<String> {
        let source = ImageReference::directory(entry.path());

        let image_id = entry.read_image_id().await?.ok_or_else(|| {
            CacheError::sync_incomplete(key.as_str(), "entry has no imageID marker")
        })?;

        let destination = self
            .store
            .resolve(&image_id)
            .map_err(|source| CacheError::ImageReference {
                image_id: image_id.clone(),
                source,
            })?;

        ensure_active(cancel)?;
        debug!(
            key = %key,
            backend = backend,
            from = %source,
            to = %destination,
            "Materializing cached image"
        );
        self.transfer
            .copy_image(cancel, scope.context(), &destination, &source)
            .await
            .map_err(|source| CacheError::Transfer {
                backend,
                key: key.to_string(),
                source,
            })?;

        Ok(image_id)
    }

    /// Copy `image_id` from the image store into `entry` and write its marker
    pub(crate) async fn export(
        &self,
        cancel: &CancellationToken,
        backend: &'static str,
        key: &CacheKey,
        image_id: &str,
        entry: &EntryDir,
    ) -> CacheResult<()> {
        let source = self
            .store
            .resolve(image_id)
            .map_err(|source| CacheError::ImageReference {
                image_id: image_id.to_string(),
                source,
            })?;

        let scope = PolicyScope::acquire(self.policy.as_ref(), &self.system)?;
        let result = self
            .export_scoped(cancel, backend, key, image_id, entry, &source, &scope)
            .await;
        scope.finish(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn export_scoped(
        &self,
        cancel: &CancellationToken,
        backend: &'static str,
        key: &CacheKey,
        image_id: &str,
        entry: &EntryDir,
        source: &ImageReference,
        scope: &PolicyScope,
    ) -> CacheResult<()> {
        let destination = ImageReference::directory(entry.path());

        ensure_active(cancel)?;
        debug!(key = %key, backend = backend, from = %source, to = %destination, "Capturing image");
        self.transfer
            .copy_image(cancel, scope.context(), &destination, source)
            .await
            .map_err(|source| CacheError::Transfer {
                backend,
                key: key.to_string(),
                source,
            })?;

        entry.write_image_id(image_id).await
    }
}
