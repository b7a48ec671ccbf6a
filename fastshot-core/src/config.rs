use std::path::{Path, PathBuf};

use fastshot_types::OrphanPolicy;
use serde::{Deserialize, Serialize};

/// The full set of options recognized from a TOML configuration file
/// (§6 "Configuration"). Loaded with `toml`, the one example repo in the
/// pack (`atomize-hq-codex-wrapper`'s `codex::mcp::config`) that reads a
/// `config.toml` into a `serde`-derived struct this way; the teacher
/// itself takes everything from `clap` and has no file-based config.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("object_store", &self.object_store)
            .field("cache", &self.cache)
            .field("sync", &self.sync)
            .field("security", &self.security)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub proxy_url: Option<String>,
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
}

fn default_tls_verify() -> bool {
    true
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            proxy_url: None,
            tls_verify: default_tls_verify(),
        }
    }
}

/// Credentials never print in logs -- `Debug` is hand-written to redact
/// `access_key`/`secret_key` the way nothing in the pack's config types
/// needed to, but every teacher crate treats credentials as opaque
/// (`peoci::ocidist::Client` takes a bearer token, never logs it).
impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("proxy_url", &self.proxy_url)
            .field("tls_verify", &self.tls_verify)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".fastshot-cache")
}

fn default_max_body_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { root_dir: default_root_dir(), max_body_bytes: default_max_body_bytes() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_op_timeout_s")]
    pub op_timeout_s: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

fn default_workers() -> usize {
    3
}

fn default_op_timeout_s() -> u64 {
    30
}

fn default_retry_max() -> u32 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            op_timeout_s: default_op_timeout_s(),
            retry_max: default_retry_max(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Whether the remote object store has enough configuration to
    /// attempt a connection (§7 `NotConfigured`: "no credentials/bucket").
    pub fn object_store_configured(&self) -> bool {
        self.object_store.bucket.is_some() && self.object_store.access_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = Config::default();
        assert!(config.object_store.tls_verify);
        assert_eq!(config.sync.workers, 3);
        assert_eq!(config.sync.op_timeout_s, 30);
        assert_eq!(config.sync.retry_max, 5);
        assert_eq!(config.sync.orphan_policy, OrphanPolicy::Prompt);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml = r#"
            [object_store]
            bucket = "screenshots"
            access_key = "AKIA..."
            secret_key = "shh"

            [cache]
            root_dir = "/home/user/.cache/fastshot"

            [security]
            encryption_key = "hunter2"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.object_store.bucket.as_deref(), Some("screenshots"));
        assert!(config.object_store_configured());
        assert_eq!(config.cache.root_dir, PathBuf::from("/home/user/.cache/fastshot"));
        assert!(format!("{:?}", config).contains("<redacted>"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
