//! In-process stand-ins for the image collaborators

use super::Collaborators;
use crate::error::BoxError;
use crate::image::{
    ImageReference, ImageStore, ImageTransfer, PolicyContext, PolicyProvider, SystemContext,
};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Image store backed by one directory per image
pub struct DirImages {
    root: PathBuf,
    pub copies: AtomicUsize,
    pub fail_copy: AtomicBool,
}

impl DirImages {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            copies: AtomicUsize::new(0),
            fail_copy: AtomicBool::new(false),
        }
    }

    pub fn image_dir(&self, image_id: &str) -> PathBuf {
        self.root.join(image_id.replace(':', "_"))
    }

    /// Add an image whose config blob is named after its id
    pub fn add_image(&self, image_id: &str, layers: &[(&str, &[u8])]) {
        let dir = self.image_dir(image_id);
        let blobs = dir.join("blobs");
        std::fs::create_dir_all(&blobs).unwrap();

        let config = image_id.rsplit(':').next().unwrap();
        std::fs::write(blobs.join(config), b"{\"architecture\":\"amd64\"}").unwrap();
        let layer_json: Vec<_> = layers
            .iter()
            .map(|(hex, body)| {
                std::fs::write(blobs.join(hex), body).unwrap();
                json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar",
                    "digest": format!("sha256:{}", hex),
                    "size": body.len(),
                })
            })
            .collect();
        let manifest = json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": format!("sha256:{}", config),
                "size": 24,
            },
            "layers": layer_json,
        });
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    }

    pub fn has_image(&self, image_id: &str) -> bool {
        self.image_dir(image_id).join("manifest.json").is_file()
    }

    fn path_of(&self, reference: &ImageReference) -> PathBuf {
        match reference {
            ImageReference::Store { image_id } => self.image_dir(image_id),
            ImageReference::Directory(path) => path.clone(),
        }
    }
}

impl ImageStore for DirImages {
    fn resolve(&self, image_id: &str) -> Result<ImageReference, BoxError> {
        if image_id.is_empty() {
            return Err("empty image id".into());
        }
        Ok(ImageReference::Store {
            image_id: image_id.to_string(),
        })
    }
}

#[async_trait]
impl ImageTransfer for DirImages {
    async fn copy_image(
        &self,
        _cancel: &CancellationToken,
        _policy: &dyn PolicyContext,
        destination: &ImageReference,
        source: &ImageReference,
    ) -> Result<(), BoxError> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err("copy refused".into());
        }
        let from = self.path_of(source);
        if !from.join("manifest.json").is_file() {
            return Err(format!("no image at {}", source).into());
        }
        copy_tree(&from, &self.path_of(destination))?;
        Ok(())
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == "imageID" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to.join(&name))?;
        } else {
            std::fs::copy(entry.path(), to.join(&name))?;
        }
    }
    Ok(())
}

/// Policy provider that always grants and counts releases
#[derive(Default)]
pub struct CountingPolicy {
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

struct CountingContext {
    released: Arc<AtomicUsize>,
}

impl PolicyContext for CountingContext {
    fn release(&mut self) -> Result<(), BoxError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PolicyProvider for CountingPolicy {
    fn acquire(&self, _system: &SystemContext) -> Result<Box<dyn PolicyContext>, BoxError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingContext {
            released: Arc::clone(&self.released),
        }))
    }
}

pub fn collaborators(images: &Arc<DirImages>, policy: &Arc<CountingPolicy>) -> Collaborators {
    Collaborators::new(
        Arc::clone(images) as Arc<dyn ImageStore>,
        Arc::clone(images) as Arc<dyn ImageTransfer>,
        Arc::clone(policy) as Arc<dyn PolicyProvider>,
        SystemContext::default(),
    )
}
