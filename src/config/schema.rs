//! Configuration schema for buildcache
//!
//! Configuration is stored at `~/.config/buildcache/config.toml`

use crate::image::SystemContext;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Settings handed to the policy subsystem and transfer engine
    pub system: SystemConfig,

    /// Local directory backend
    pub local: LocalConfig,

    /// Remote object store backend
    pub remote: RemoteConfig,

    /// Backend ordering
    pub cascade: CascadeConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Trust policy and registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Signature policy file (defaults to the system policy when unset)
    pub signature_policy_path: Option<PathBuf>,

    /// Registry authentication file
    pub auth_file: Option<PathBuf>,
}

impl SystemConfig {
    /// Build the system context passed to policy acquisition
    pub fn context(&self) -> SystemContext {
        SystemContext {
            signature_policy_path: self.signature_policy_path.clone(),
            auth_file: self.auth_file.clone(),
        }
    }
}

/// Local directory backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Enable the local directory backend
    pub enabled: bool,

    /// Directory holding one subdirectory per cache key
    pub root: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_cache_dir().join("layers"),
        }
    }
}

/// Remote object store backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Enable the remote backend
    pub enabled: bool,

    /// Local mirror directory for synchronized entries
    pub root: PathBuf,

    /// Endpoint URL, e.g. `https://s3.amazonaws.com` or `http://minio:9000`
    pub endpoint: String,

    /// Signing region
    pub region: String,

    /// Bucket holding cache entries
    pub bucket: String,

    /// Access key ID (anonymous requests when unset)
    pub access_key: Option<String>,

    /// Secret access key
    pub secret_key: Option<String>,

    /// Address the bucket in the path instead of the host name
    pub path_style: bool,

    /// Retries for rate-limited, timed-out or 5xx requests
    pub max_retries: u32,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: default_cache_dir().join("mirror"),
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            bucket: String::new(),
            access_key: None,
            secret_key: None,
            path_style: true,
            max_retries: 2,
            request_timeout_secs: 300,
        }
    }
}

/// Backend ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Backends consulted in order by `load`; all of them receive `store`
    pub order: Vec<BackendKind>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            order: vec![BackendKind::Local, BackendKind::Remote],
        }
    }
}

/// Cache backend identifiers used in `[cascade] order`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

/// Default base directory for cache data
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buildcache")
}
