//! Object-store-backed cache
//!
//! Entries are mirrored between a local directory and a bucket, one object
//! per entry file keyed `<key>/<relative path>`. A load synchronizes the
//! remote entry into the mirror (unless it is already there) and then
//! materializes it exactly like the directory backend.
//!
//! Synchronization downloads into a staging directory next to the mirror
//! entries and renames it into place only once the marker, manifest and every
//! referenced blob are present. An interrupted sync therefore never leaves a
//! half-populated entry that a later load would trust.

use super::{ensure_active, CacheProvider, Collaborators};
use crate::entry::layout::write_atomic;
use crate::entry::{image_blob_name, EntryDir, EntryLayout, Manifest, BLOBS_DIR};
use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use crate::objectstore::ObjectStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NAME: &str = "remote";

/// Cache backend mirroring entries to an object store
pub struct RemoteObjectProvider {
    collaborators: Collaborators,
    layout: EntryLayout,
    objects: Arc<dyn ObjectStore>,
}

impl RemoteObjectProvider {
    pub fn new(
        collaborators: Collaborators,
        mirror_root: impl Into<PathBuf>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            collaborators,
            layout: EntryLayout::new(mirror_root),
            objects,
        }
    }

    pub fn layout(&self) -> &EntryLayout {
        &self.layout
    }

    /// Pull the remote entry for `key` into the mirror.
    ///
    /// Returns `false` when the bucket holds nothing under the key.
    async fn synchronize(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
        entry: &EntryDir,
    ) -> CacheResult<bool> {
        self.layout.ensure_root().await?;

        ensure_active(cancel)?;
        let prefix = format!("{}/", key);
        let objects: Vec<String> = self
            .objects
            .list(&prefix)
            .await
            .map_err(|source| CacheError::RemoteList {
                key: key.to_string(),
                source,
            })?
            .into_iter()
            .filter(|object| {
                // Zero-byte "directory" placeholders created by bucket browsers
                let marker = object.ends_with('/');
                if marker {
                    debug!(object = %object, "Skipping folder marker");
                }
                !marker
            })
            .collect();
        if objects.is_empty() {
            debug!(key = %key, bucket = self.objects.bucket(), "Cache miss");
            return Ok(false);
        }
        debug!(key = %key, count = objects.len(), "Synchronizing remote entry");

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.sync-", key))
            .tempdir_in(self.layout.root())
            .map_err(|e| {
                CacheError::io(
                    format!("creating staging dir in {}", self.layout.root().display()),
                    e,
                )
            })?;
        let staged = EntryDir::new(staging.path());

        for object in &objects {
            let relative = relative_object_path(key, object)?;
            ensure_active(cancel)?;
            self.download(key, object, &staged.path().join(relative)).await?;
        }

        let image_id = staged.read_image_id().await?.ok_or_else(|| {
            CacheError::sync_incomplete(key.as_str(), "remote entry has no imageID marker")
        })?;

        let manifest_path = staged.manifest_path();
        if !fs::try_exists(&manifest_path)
            .await
            .map_err(|e| CacheError::io(format!("checking {}", manifest_path.display()), e))?
        {
            return Err(CacheError::sync_incomplete(
                key.as_str(),
                "remote entry has no manifest.json",
            ));
        }
        let manifest = Manifest::from_file(&manifest_path, key.as_str()).await?;

        let config = image_blob_name(&image_id).ok_or_else(|| {
            CacheError::sync_incomplete(
                key.as_str(),
                format!("image id {:?} does not name a blob", image_id),
            )
        })?;
        let required = manifest.references_config(config);
        self.fetch_blob(cancel, key, &staged, config, required).await?;

        for layer in manifest.layer_blob_names(key.as_str())? {
            self.fetch_blob(cancel, key, &staged, layer, true).await?;
        }

        publish(staging, entry).await?;
        info!(
            key = %key,
            image_id = %image_id,
            objects = objects.len(),
            "Synchronized remote entry"
        );
        Ok(true)
    }

    async fn download(&self, key: &CacheKey, object: &str, path: &Path) -> CacheResult<()> {
        let body = self
            .objects
            .get_object(object)
            .await
            .map_err(|source| CacheError::Download {
                key: key.to_string(),
                object: object.to_string(),
                source,
            })?;
        debug!(object = %object, bytes = body.len(), "Downloaded object");
        write_atomic(path, body).await
    }

    /// Fetch `blobs/<name>` unless the staged entry already has it.
    ///
    /// A blob that is not `required` may be absent remotely.
    async fn fetch_blob(
        &self,
        cancel: &CancellationToken,
        key: &CacheKey,
        staged: &EntryDir,
        name: &str,
        required: bool,
    ) -> CacheResult<()> {
        let path = staged.blob_path(name);
        if fs::try_exists(&path)
            .await
            .map_err(|e| CacheError::io(format!("checking {}", path.display()), e))?
        {
            return Ok(());
        }

        ensure_active(cancel)?;
        let object = format!("{}/{}/{}", key, BLOBS_DIR, name);
        match self.objects.get_object(&object).await {
            Ok(body) if body.is_empty() => Err(CacheError::EmptyBlob {
                key: key.to_string(),
                object,
            }),
            Ok(body) => {
                debug!(object = %object, bytes = body.len(), "Fetched missing blob");
                write_atomic(&path, body).await
            }
            Err(e) if e.is_not_found() && !required => {
                debug!(
                    object = %object,
                    "Blob named by image id is absent and unreferenced, skipping"
                );
                Ok(())
            }
            Err(source) => Err(CacheError::Download {
                key: key.to_string(),
                object,
                source,
            }),
        }
    }
}

/// Local path of `object` relative to the entry directory
fn relative_object_path(key: &CacheKey, object: &str) -> CacheResult<PathBuf> {
    let relative = object
        .strip_prefix(key.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or_default();

    let mut path = PathBuf::new();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(CacheError::sync_incomplete(
                key.as_str(),
                format!("remote object {:?} does not map to a file in the entry", object),
            ));
        }
        path.push(segment);
    }
    Ok(path)
}

/// Move a fully synchronized staging directory into place
async fn publish(staging: tempfile::TempDir, entry: &EntryDir) -> CacheResult<()> {
    match fs::rename(staging.path(), entry.path()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if entry.exists().await? {
                debug!(
                    path = %entry.path().display(),
                    "Entry published concurrently, discarding staged copy"
                );
                Ok(())
            } else {
                Err(CacheError::io(
                    format!("publishing {}", entry.path().display()),
                    e,
                ))
            }
        }
    }
}

#[async_trait]
impl CacheProvider for RemoteObjectProvider {
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

        if entry.exists().await? {
            debug!(key = %key, "Mirror entry present, skipping synchronization");
        } else if !self.synchronize(cancel, key, &entry).await? {
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

        let files = entry.files().await?;
        for (relative, path) in &files {
            ensure_active(cancel)?;
            let object = format!("{}/{}", key, relative);
            let body = fs::read(path)
                .await
                .map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
            let bytes = body.len();
            self.objects
                .put_object(&object, body)
                .await
                .map_err(|source| CacheError::Upload {
                    key: key.to_string(),
                    object: object.clone(),
                    source,
                })?;
            debug!(object = %object, bytes = bytes, "Uploaded object");
        }

        info!(
            key = %key,
            image_id = %image_id,
            bucket = self.objects.bucket(),
            objects = files.len(),
            "Stored layer"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }
}
