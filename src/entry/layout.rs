//! On-disk cache entry layout
//!
//! ```text
//! <root>/<key>/imageID          raw image id bytes
//! <root>/<key>/manifest.json    image manifest
//! <root>/<key>/blobs/<encoded>  config and layer blobs, digest without algorithm
//! ```

use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Marker file holding the image id of the cached image
pub const IMAGE_ID_FILENAME: &str = "imageID";

/// Manifest file name
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Blob subdirectory name
pub const BLOBS_DIR: &str = "blobs";

/// Root directory holding one entry directory per cache key
#[derive(Debug, Clone)]
pub struct EntryLayout {
    root: PathBuf,
}

impl EntryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for `key` (which may not exist yet)
    pub fn entry(&self, key: &CacheKey) -> EntryDir {
        EntryDir::new(self.root.join(key.as_str()))
    }

    /// Create the root directory if needed
    pub async fn ensure_root(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            CacheError::io(format!("creating cache root {}", self.root.display()), e)
        })
    }
}

/// A single cache entry directory
#[derive(Debug, Clone)]
pub struct EntryDir {
    path: PathBuf,
}

impl EntryDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image_id_path(&self) -> PathBuf {
        self.path.join(IMAGE_ID_FILENAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILENAME)
    }

    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.path.join(BLOBS_DIR).join(name)
    }

    /// Whether the entry directory exists
    pub async fn exists(&self) -> CacheResult<bool> {
        fs::try_exists(&self.path)
            .await
            .map_err(|e| CacheError::io(format!("checking {}", self.path.display()), e))
    }

    /// Read the image id marker, `None` if the marker is absent
    pub async fn read_image_id(&self) -> CacheResult<Option<String>> {
        let path = self.image_id_path();
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Write the image id marker verbatim
    pub async fn write_image_id(&self, image_id: &str) -> CacheResult<()> {
        write_atomic(&self.image_id_path(), image_id.as_bytes().to_vec()).await
    }

    /// Every regular file below the entry directory as
    /// `(relative path with '/' separators, absolute path)`, sorted
    pub async fn files(&self) -> CacheResult<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| CacheError::io(format!("listing {}", dir.display()), e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CacheError::io(format!("listing {}", dir.display()), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| CacheError::io(format!("inspecting {}", path.display()), e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let relative = relative_key(&self.path, &path)?;
                    files.push((relative, path));
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn relative_key(base: &Path, path: &Path) -> CacheResult<String> {
    let relative = path.strip_prefix(base).map_err(|e| {
        CacheError::io(
            format!("resolving {} below {}", path.display(), base.display()),
            std::io::Error::other(e),
        )
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Write `data` to `path` through a temp file in the same directory, so a
/// reader never observes a partially written file
pub async fn write_atomic(path: &Path, data: Vec<u8>) -> CacheResult<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist(&path, &data))
        .await
        .map_err(|e| CacheError::io("joining file writer", std::io::Error::other(e)))?
}

fn persist(path: &Path, data: &[u8]) -> CacheResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::io(format!("creating {}", parent.display()), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| CacheError::io(format!("creating temp file in {}", parent.display()), e))?;
    tmp.write_all(data)
        .map_err(|e| CacheError::io(format!("writing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| CacheError::io(format!("persisting {}", path.display()), e.error))?;
    Ok(())
}
