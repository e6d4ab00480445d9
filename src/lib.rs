//! buildcache - Layer cache for container image builds
//!
//! Derives a cache key from everything that determines a build step's output
//! and stores or restores the resulting image through an ordered cascade of
//! backends: a local or shared directory, and an S3-compatible bucket.

pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod image;
pub mod logging;
pub mod objectstore;
pub mod provider;

pub use config::{Config, ConfigManager};
pub use error::{CacheError, CacheResult};
pub use fingerprint::{derive_key, CacheKey, HistoryEntry};
pub use provider::{
    build_cascade, CacheProvider, CascadeProvider, Collaborators, LocalDirectoryProvider,
    RemoteObjectProvider,
};
