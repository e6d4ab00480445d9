//! Directory-backed cache
//!
//! Entries live directly under a root directory, which may be local disk or
//! a shared filesystem mounted by several build hosts.

use super::{ensure_active, CacheProvider, Collaborators};
use crate::entry::EntryLayout;
use crate::error::CacheResult;
use crate::fingerprint::CacheKey;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NAME: &str = "local";

/// Cache backend storing one entry directory per key
pub struct LocalDirectoryProvider {
    collaborators: Collaborators,
    layout: EntryLayout,
}

impl LocalDirectoryProvider {
    pub fn new(collaborators: Collaborators, root: impl Into<PathBuf>) -> Self {
        Self {
            collaborators,
            layout: EntryLayout::new(root),
        }
    }

    pub fn layout(&self) -> &EntryLayout {
        &self.layout
    }
}

#[async_trait]
impl CacheProvider for LocalDirectoryProvider {
    async fn populate_layer(
        &self,
        _cancel: &CancellationToken,
        _top_layer: &str,
    ) -> CacheResult<()> {
        Ok(())
    }

    async fn load(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
    ) -> CacheResult<Option<String>> {
        ensure_active(cancel)?;
        let entry = self.layout.entry(key);
        if !entry.exists().await? {
            debug!(key = %key, root = %self.layout.root().display(), "Cache miss");
            return Ok(None);
        }

        let image_id = self.collaborators.import(cancel, NAME, key, &entry).await?;
        info!(key = %key, image_id = %image_id, "Loaded cached layer");
        Ok(Some(image_id))
    }

    async fn store(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
        image_id: &str,
    ) -> CacheResult<()> {
        ensure_active(cancel)?;
        self.layout.ensure_root().await?;
        let entry = self.layout.entry(key);

        self.collaborators
            .export(cancel, NAME, key, image_id, &entry)
            .await?;
        info!(key = %key, image_id = %image_id, path = %entry.path().display(), "Stored layer");
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }
}
