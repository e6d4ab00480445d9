//! Ordered composition of cache backends

use super::CacheProvider;
use crate::error::CacheResult;
use crate::fingerprint::CacheKey;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache made of several backends, cheapest first.
///
/// Loads stop at the first hit. Stores and warm-up hints go to every backend
/// in order. The first backend error aborts the operation; backends already
/// written by a failed store keep their entry.
pub struct CascadeProvider {
    providers: Vec<Arc<dyn CacheProvider>>,
}

impl CascadeProvider {
    pub fn new(providers: Vec<Arc<dyn CacheProvider>>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[Arc<dyn CacheProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl CacheProvider for CascadeProvider {
    async fn populate_layer(
        &self,
        cancel: &CancellationToken,
        top_layer: &str,
    ) -> CacheResult<()> {
        for provider in &self.providers {
            provider
                .populate_layer(cancel, top_layer)
                .await
                .inspect_err(|e| {
                    warn!(backend = provider.name(), error = %e, "Populate failed")
                })?;
        }
        Ok(())
    }

    async fn load(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
    ) -> CacheResult<Option<String>> {
        for provider in &self.providers {
            let loaded = provider
                .load(cancel, key)
                .await
                .inspect_err(|e| {
                    warn!(backend = provider.name(), key = %key, error = %e, "Load failed")
                })?;
            if let Some(image_id) = loaded {
                debug!(backend = provider.name(), key = %key, "Cache hit");
                return Ok(Some(image_id));
            }
        }
        debug!(key = %key, backends = self.providers.len(), "Cache miss on every backend");
        Ok(None)
    }

    async fn store(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
        image_id: &str,
    ) -> CacheResult<()> {
        for provider in &self.providers {
            provider
                .store(cancel, key, image_id)
                .await
                .inspect_err(|e| {
                    warn!(backend = provider.name(), key = %key, error = %e, "Store failed")
                })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cascade"
    }
}
