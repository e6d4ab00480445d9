//! Integration tests for buildcache

mod support {
    use async_trait::async_trait;
    use buildcache::error::BoxError;
    use buildcache::image::{
        ImageReference, ImageStore, ImageTransfer, PolicyContext, PolicyProvider, SystemContext,
    };
    use buildcache::Collaborators;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// Image store and transfer engine keeping images as in-memory file maps
    #[derive(Default)]
    pub struct FakeEngine {
        images: Mutex<BTreeMap<String, BTreeMap<PathBuf, Vec<u8>>>>,
        pub copies: AtomicUsize,
    }

    impl FakeEngine {
        /// Add an image with one layer; its config blob is named after the id
        pub fn add_image(&self, image_id: &str, layer_hex: &str, layer: &[u8]) {
            let config = image_id.trim_start_matches("sha256:");
            let manifest = json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {
                    "mediaType": "application/vnd.oci.image.config.v1+json",
                    "digest": format!("sha256:{config}"),
                    "size": 2,
                },
                "layers": [{
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": format!("sha256:{layer_hex}"),
                    "size": layer.len(),
                }],
            });
            let mut files = BTreeMap::new();
            files.insert(PathBuf::from("manifest.json"), manifest.to_string().into_bytes());
            files.insert(Path::new("blobs").join(config), b"{}".to_vec());
            files.insert(Path::new("blobs").join(layer_hex), layer.to_vec());
            self.images.lock().unwrap().insert(image_id.to_string(), files);
        }

        pub fn remove_image(&self, image_id: &str) {
            self.images.lock().unwrap().remove(image_id);
        }

        pub fn has_image(&self, image_id: &str) -> bool {
            self.images.lock().unwrap().contains_key(image_id)
        }

        pub fn copies(&self) -> usize {
            self.copies.load(Ordering::SeqCst)
        }
    }

    impl ImageStore for FakeEngine {
        fn resolve(&self, image_id: &str) -> Result<ImageReference, BoxError> {
            Ok(ImageReference::Store {
                image_id: image_id.to_string(),
            })
        }
    }

    #[async_trait]
    impl ImageTransfer for FakeEngine {
        async fn copy_image(
            &self,
            _cancel: &CancellationToken,
            _policy: &dyn PolicyContext,
            destination: &ImageReference,
            source: &ImageReference,
        ) -> Result<(), BoxError> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            match (source, destination) {
                (ImageReference::Store { image_id }, ImageReference::Directory(dir)) => {
                    let files = self
                        .images
                        .lock()
                        .unwrap()
                        .get(image_id)
                        .cloned()
                        .ok_or_else(|| format!("image {image_id} not in store"))?;
                    for (relative, body) in files {
                        let path = dir.join(relative);
                        std::fs::create_dir_all(path.parent().unwrap())?;
                        std::fs::write(path, body)?;
                    }
                    Ok(())
                }
                (ImageReference::Directory(dir), ImageReference::Store { image_id }) => {
                    let mut files = BTreeMap::new();
                    let manifest = std::fs::read(dir.join("manifest.json"))?;
                    files.insert(PathBuf::from("manifest.json"), manifest);
                    for blob in std::fs::read_dir(dir.join("blobs"))? {
                        let blob = blob?;
                        files.insert(
                            Path::new("blobs").join(blob.file_name()),
                            std::fs::read(blob.path())?,
                        );
                    }
                    self.images.lock().unwrap().insert(image_id.clone(), files);
                    Ok(())
                }
                _ => Err("unsupported copy".into()),
            }
        }
    }

    #[derive(Default)]
    pub struct FakePolicy {
        pub open: Arc<AtomicUsize>,
    }

    struct FakeContext(Arc<AtomicUsize>);

    impl PolicyContext for FakeContext {
        fn release(&mut self) -> Result<(), BoxError> {
            self.0.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl PolicyProvider for FakePolicy {
        fn acquire(&self, _system: &SystemContext) -> Result<Box<dyn PolicyContext>, BoxError> {
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeContext(Arc::clone(&self.open))))
        }
    }

    pub fn collaborators(engine: &Arc<FakeEngine>, policy: &Arc<FakePolicy>) -> Collaborators {
        Collaborators::new(
            Arc::clone(engine) as Arc<dyn ImageStore>,
            Arc::clone(engine) as Arc<dyn ImageTransfer>,
            Arc::clone(policy) as Arc<dyn PolicyProvider>,
            SystemContext::default(),
        )
    }
}

mod fingerprint_tests {
    use buildcache::{derive_key, HistoryEntry};
    use chrono::{TimeZone, Utc};

    const DOCKER_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    const OCI: &str = "application/vnd.oci.image.manifest.v1+json";

    fn history() -> Vec<HistoryEntry> {
        vec![HistoryEntry {
            created: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            created_by: "/bin/sh -c #(nop) ADD file:abc in / ".to_string(),
            ..Default::default()
        }]
    }

    #[test]
    fn key_is_deterministic() {
        let a = derive_key(OCI, true, "parent", &history(), "RUN make", &["sha256:0011"]);
        let b = derive_key(OCI, true, "parent", &history(), "RUN make", &["sha256:0011"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_is_sensitive_to_every_input() {
        let base = derive_key(OCI, true, "parent", &history(), "RUN make", &["sha256:0011"]);

        let mut other_history = history();
        other_history[0].empty_layer = true;

        let variants = [
            derive_key(DOCKER_V2, true, "parent", &history(), "RUN make", &["sha256:0011"]),
            derive_key(OCI, false, "parent", &history(), "RUN make", &["sha256:0011"]),
            derive_key(OCI, true, "other", &history(), "RUN make", &["sha256:0011"]),
            derive_key(OCI, true, "parent", &other_history, "RUN make", &["sha256:0011"]),
            derive_key(OCI, true, "parent", &[], "RUN make", &["sha256:0011"]),
            derive_key(OCI, true, "parent", &history(), "RUN make test", &["sha256:0011"]),
            derive_key(OCI, true, "parent", &history(), "RUN make", &["sha256:0022"]),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }
}

mod cache_tests {
    use super::support::{collaborators, FakeEngine, FakePolicy};
    use buildcache::config::BackendKind;
    use buildcache::objectstore::{MemoryObjectStore, ObjectStore};
    use buildcache::provider::build_cascade_with_object_store;
    use buildcache::{
        CacheError, CacheKey, CacheProvider, CascadeProvider, Config, LocalDirectoryProvider,
        RemoteObjectProvider,
    };
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    const IMAGE: &str = "sha256:cafef00d";

    struct Harness {
        temp: TempDir,
        engine: Arc<FakeEngine>,
        policy: Arc<FakePolicy>,
        bucket: Arc<MemoryObjectStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                engine: Arc::new(FakeEngine::default()),
                policy: Arc::new(FakePolicy::default()),
                bucket: Arc::new(MemoryObjectStore::new("build-layers")),
            }
        }

        fn local(&self) -> Arc<LocalDirectoryProvider> {
            Arc::new(LocalDirectoryProvider::new(
                collaborators(&self.engine, &self.policy),
                self.temp.path().join("local"),
            ))
        }

        /// Remote backend; each `host` gets its own mirror directory
        fn remote(&self, host: &str) -> Arc<RemoteObjectProvider> {
            Arc::new(RemoteObjectProvider::new(
                collaborators(&self.engine, &self.policy),
                self.temp.path().join(host).join("mirror"),
                Arc::clone(&self.bucket) as Arc<dyn ObjectStore>,
            ))
        }

        fn cascade(&self, host: &str) -> CascadeProvider {
            CascadeProvider::new(vec![self.local(), self.remote(host)])
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("4f1c0ffee").unwrap()
    }

    #[tokio::test]
    async fn cold_cache_misses() {
        let h = Harness::new();
        let loaded = h.cascade("host-a").load(&CancellationToken::new(), &key()).await.unwrap();
        assert_eq!(loaded, None);
        assert_eq!(h.engine.copies(), 0);
        assert_eq!(h.bucket.list_calls(), 1);
    }

    #[tokio::test]
    async fn store_then_warm_local_hit() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");
        let cascade = h.cascade("host-a");
        let cancel = CancellationToken::new();

        cascade.store(&cancel, &key(), IMAGE).await.unwrap();
        let lists = h.bucket.list_calls();

        let loaded = cascade.load(&cancel, &key()).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(IMAGE));
        // Served by the local backend without touching the bucket
        assert_eq!(h.bucket.list_calls(), lists);
        assert_eq!(h.policy.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_fans_out_to_every_backend() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");

        h.cascade("host-a")
            .store(&CancellationToken::new(), &key(), IMAGE)
            .await
            .unwrap();

        let local = h.temp.path().join("local").join(key().as_str());
        assert_eq!(std::fs::read(local.join("imageID")).unwrap(), IMAGE.as_bytes());
        assert!(local.join("manifest.json").is_file());
        assert!(local.join("blobs").join("0011").is_file());

        let keys = h.bucket.keys();
        assert!(keys.contains(&"4f1c0ffee/imageID".to_string()));
        assert!(keys.contains(&"4f1c0ffee/manifest.json".to_string()));
        assert!(keys.contains(&"4f1c0ffee/blobs/0011".to_string()));
        assert!(keys.contains(&"4f1c0ffee/blobs/cafef00d".to_string()));
    }

    #[tokio::test]
    async fn remote_only_hit_on_another_host() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");
        h.remote("host-a")
            .store(&CancellationToken::new(), &key(), IMAGE)
            .await
            .unwrap();
        h.engine.remove_image(IMAGE);

        let loaded = h
            .cascade("host-b")
            .load(&CancellationToken::new(), &key())
            .await
            .unwrap();
        assert_eq!(loaded.as_deref(), Some(IMAGE));
        assert!(h.engine.has_image(IMAGE));

        let mirror = h.temp.path().join("host-b").join("mirror").join(key().as_str());
        assert_eq!(std::fs::read(mirror.join("blobs").join("0011")).unwrap(), b"layer-bytes");
    }

    #[tokio::test]
    async fn remote_sync_is_idempotent() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");
        h.remote("host-a")
            .store(&CancellationToken::new(), &key(), IMAGE)
            .await
            .unwrap();

        let remote = h.remote("host-b");
        let cancel = CancellationToken::new();
        remote.load(&cancel, &key()).await.unwrap();
        let (lists, gets) = (h.bucket.list_calls(), h.bucket.get_calls());

        let loaded = remote.load(&cancel, &key()).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(IMAGE));
        assert_eq!(h.bucket.list_calls(), lists);
        assert_eq!(h.bucket.get_calls(), gets);
    }

    #[tokio::test]
    async fn malformed_remote_manifest_is_an_error() {
        let h = Harness::new();
        h.bucket.insert("4f1c0ffee/imageID", IMAGE);
        h.bucket.insert(
            "4f1c0ffee/manifest.json",
            r#"{"schemaVersion":2,"layers":[{"mediaType":"x","digest":"sha","size":1}]}"#,
        );
        h.bucket.insert("4f1c0ffee/blobs/cafef00d", "{}");

        let err = h
            .cascade("host-a")
            .load(&CancellationToken::new(), &key())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ManifestInvalid { .. }));
        assert!(err.hint().is_some());
        assert!(!h.temp.path().join("host-a").join("mirror").join(key().as_str()).exists());
    }

    #[tokio::test]
    async fn cascade_from_config() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");

        let mut config: Config = toml::from_str(
            r#"
            [cascade]
            order = ["remote", "local"]

            [remote]
            enabled = true
            endpoint = "http://127.0.0.1:9000"
            bucket = "build-layers"
            "#,
        )
        .unwrap();
        config.local.root = h.temp.path().join("local");
        config.remote.root = h.temp.path().join("mirror");
        buildcache::config::validate(&config).unwrap();
        assert_eq!(config.cascade.order, vec![BackendKind::Remote, BackendKind::Local]);

        let cascade = build_cascade_with_object_store(
            &config,
            collaborators(&h.engine, &h.policy),
            Arc::clone(&h.bucket) as Arc<dyn ObjectStore>,
        )
        .unwrap();
        let names: Vec<_> = cascade.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["remote", "local"]);

        let cancel = CancellationToken::new();
        cascade.store(&cancel, &key(), IMAGE).await.unwrap();
        assert_eq!(cascade.load(&cancel, &key()).await.unwrap().as_deref(), Some(IMAGE));
    }

    #[tokio::test]
    async fn cancelled_operations_do_nothing() {
        let h = Harness::new();
        h.engine.add_image(IMAGE, "0011", b"layer-bytes");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.cascade("host-a").store(&cancel, &key(), IMAGE).await.unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
        assert_eq!(h.engine.copies(), 0);
        assert_eq!(h.bucket.put_calls(), 0);
    }
}

mod config_tests {
    use buildcache::ConfigManager;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_and_reload() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nested").join("config.toml"));

        let mut config = manager.load().await.unwrap();
        config.remote.bucket = "build-layers".to_string();
        config.general.log_format = "json".to_string();
        manager.save(&config).await.unwrap();

        let reloaded = manager.load().await.unwrap();
        assert_eq!(reloaded.remote.bucket, "build-layers");
        assert_eq!(reloaded.general.log_format, "json");
    }

    #[tokio::test]
    async fn invalid_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[remote]\nenabled = true\n").unwrap();

        let manager = ConfigManager::with_path(path);
        assert!(manager.load().await.is_err());
    }
}
