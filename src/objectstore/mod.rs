//! Remote object store abstraction
//!
//! The remote cache backend only needs three operations from an object
//! store: prefix listing, whole-object download and whole-object upload.
//! The bucket is fixed when the client is constructed.

mod errors;
mod http;
mod memory;

pub use errors::ObjectStoreError;
pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;

/// Abstract object store interface
///
/// Implementations:
/// - `HttpObjectStore`: S3-compatible HTTP endpoints
/// - `MemoryObjectStore`: in-process map, used for embedding and tests
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object key starting with `prefix`, across all pages
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Download the full content of `key`
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Upload `body` as `key`, replacing any existing object
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError>;

    /// Bucket this client operates on (for diagnostics)
    fn bucket(&self) -> &str;
}
