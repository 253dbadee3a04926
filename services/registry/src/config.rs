//! Server configuration
//!
//! ```toml
//! listen = "0.0.0.0:5000"
//! bucket = "registry"
//!
//! [storage]
//! driver = "local"
//! path = "/var/lib/registry"
//!
//! [uploads]
//! max-age-secs = 86400
//! sweep-interval-secs = 3600
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::api::{DEFAULT_BUCKET, Registry, RegistryBuilder};

/// Top-level configuration for a registry server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Storage bucket holding every repository.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Storage backend.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Upload session expiry.
    #[serde(default)]
    pub uploads: UploadPolicy,
}

/// How long abandoned upload sessions are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct UploadPolicy {
    /// Sessions older than this are deleted by the sweeper.
    pub max_age_secs: u64,

    /// Time between sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_age_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl UploadPolicy {
    /// Maximum session age.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Sweep period. Never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 5000))
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

fn default_storage() -> StorageConfig {
    StorageConfig::Memory {
        bucket: default_bucket(),
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            bucket: default_bucket(),
            storage: default_storage(),
            uploads: UploadPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Construct the storage backend and the registry on top of it.
    pub async fn registry(&self) -> Result<Registry, StorageError> {
        let storage = self.storage.clone().build().await?;
        Ok(RegistryBuilder::new()
            .storage(storage)
            .bucket(self.bucket.clone())
            .registry())
    }
}

/// Failure to load a configuration file.
#[cfg(feature = "cli")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File that was being read.
        path: camino::Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),
}

#[cfg(feature = "cli")]
impl std::str::FromStr for RegistryConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml_edit::de::from_str(s)?)
    }
}

#[cfg(feature = "cli")]
impl RegistryConfig {
    /// Read a TOML configuration file.
    pub fn from_path(path: &camino::Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        raw.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: RegistryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen, default_listen());
        assert_eq!(config.bucket, "registry");
        assert!(matches!(config.storage, StorageConfig::Memory { ref bucket } if bucket == "registry"));
        assert_eq!(config.uploads, UploadPolicy::default());
    }

    #[test]
    fn kebab_case_keys() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "listen": "0.0.0.0:8080",
            "uploads": { "max-age-secs": 60 },
        }))
        .unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.uploads.max_age(), Duration::from_secs(60));
        assert_eq!(config.uploads.sweep_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = serde_json::from_str::<RegistryConfig>(r#"{"bukket": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let policy = UploadPolicy {
            max_age_secs: 0,
            sweep_interval_secs: 0,
        };
        assert_eq!(policy.sweep_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn builds_memory_registry() {
        let config = RegistryConfig::default();
        let registry = config.registry().await.unwrap();
        let session = registry.uploads().initiate("myapp").await.unwrap();
        assert!(!session.is_empty());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn parses_toml() {
        let config: RegistryConfig = r#"
            listen = "127.0.0.1:5001"
            bucket = "images"

            [storage]
            driver = "local"
            path = "/var/lib/registry"

            [uploads]
            sweep-interval-secs = 30
        "#
        .parse()
        .unwrap();

        assert_eq!(config.listen.port(), 5001);
        assert_eq!(config.bucket, "images");
        assert!(matches!(config.storage, StorageConfig::Local { ref path } if path == "/var/lib/registry"));
        assert_eq!(config.uploads.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.uploads.max_age_secs, 86400);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn missing_file() {
        let err = RegistryConfig::from_path(camino::Utf8Path::new("/nonexistent/registry.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
