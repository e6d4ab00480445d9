//! Cascade factory
//!
//! Builds the configured backends, in `[cascade] order`, around the image
//! collaborators supplied by the embedding build tool.

use super::{
    CacheProvider, CascadeProvider, Collaborators, LocalDirectoryProvider, RemoteObjectProvider,
};
use crate::config::{BackendKind, Config};
use crate::error::{CacheError, CacheResult};
use crate::image::{ImageStore, ImageTransfer, PolicyProvider};
use crate::objectstore::{HttpObjectStore, ObjectStore};
use std::sync::Arc;
use tracing::debug;

/// Create the cascade described by `config`
///
/// The remote backend talks to the configured S3-compatible endpoint.
/// Disabled backends are skipped; with every backend disabled the cascade
/// always misses.
pub fn build_cascade(
    config: &Config,
    store: Arc<dyn ImageStore>,
    transfer: Arc<dyn ImageTransfer>,
    policy: Arc<dyn PolicyProvider>,
) -> CacheResult<CascadeProvider> {
    let objects: Option<Arc<dyn ObjectStore>> = if config.remote.enabled {
        let client = HttpObjectStore::new(&config.remote).map_err(|source| {
            CacheError::BackendSetup {
                backend: "remote",
                source,
            }
        })?;
        Some(Arc::new(client))
    } else {
        None
    };
    assemble(config, collaborators(config, store, transfer, policy), objects)
}

/// Create the cascade described by `config` with an explicit object store
/// client for the remote backend
pub fn build_cascade_with_object_store(
    config: &Config,
    collaborators: Collaborators,
    objects: Arc<dyn ObjectStore>,
) -> CacheResult<CascadeProvider> {
    assemble(config, collaborators, Some(objects))
}

fn collaborators(
    config: &Config,
    store: Arc<dyn ImageStore>,
    transfer: Arc<dyn ImageTransfer>,
    policy: Arc<dyn PolicyProvider>,
) -> Collaborators {
    Collaborators::new(store, transfer, policy, config.system.context())
}

fn assemble(
    config: &Config,
    collaborators: Collaborators,
    objects: Option<Arc<dyn ObjectStore>>,
) -> CacheResult<CascadeProvider> {
    let mut providers: Vec<Arc<dyn CacheProvider>> = Vec::new();

    for kind in &config.cascade.order {
        match kind {
            BackendKind::Local if config.local.enabled => {
                providers.push(Arc::new(LocalDirectoryProvider::new(
                    collaborators.clone(),
                    config.local.root.clone(),
                )));
            }
            BackendKind::Remote if config.remote.enabled => {
                let objects = objects.clone().ok_or_else(|| CacheError::ConfigInvalid {
                    path: "[remote]".into(),
                    reason: "remote backend enabled without an object store client".to_string(),
                })?;
                providers.push(Arc::new(RemoteObjectProvider::new(
                    collaborators.clone(),
                    config.remote.root.clone(),
                    objects,
                )));
            }
            _ => debug!(backend = ?kind, "Backend disabled, skipping"),
        }
    }

    debug!(
        backends = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "Built cache cascade"
    );
    Ok(CascadeProvider::new(providers))
}
