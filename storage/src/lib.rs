//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io::{self, BufReader};

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, ReadHandle, StorageError, StorageErrorKind};

/// Storage backend selection, as read from a configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "driver")]
pub enum StorageConfig {
    /// Keep everything in process memory.
    Memory {
        /// Bucket created up front.
        bucket: String,
    },

    /// A directory tree on the local filesystem.
    #[cfg(feature = "local")]
    Local {
        /// Root directory; buckets are its immediate children.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Construct the configured storage backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[bucket.as_str()]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => {
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|err| StorageError::io("local", err))?;
                LocalDriver::new(path).into()
            }
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cheaply cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A view of this storage scoped to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// A [`Storage`] handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// Bucket name.
    pub bucket: String,
    driver: Arc<dyn Driver + Send + Sync + 'static>,
}

impl StorageBucket {
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    #[tracing::instrument(level = "trace", skip(self), fields(driver=self.driver.name()))]
    pub async fn exists(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        self.driver.exists(&self.bucket, remote).await
    }

    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Read a whole object into memory.
    pub async fn download_bytes(&self, remote: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut data = Vec::new();
        self.download(remote, &mut data).await?;
        Ok(data)
    }

    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// Write a whole object from memory.
    pub async fn upload_bytes(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = BufReader::new(data);
        self.upload(remote, &mut reader).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn open(&self, remote: &Utf8Path) -> Result<ReadHandle, StorageError> {
        self.driver.open(&self.bucket, remote).await
    }

    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn append<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + 'd,
    {
        tracing::trace!(%remote, "Appending to: {}/{remote}", self.bucket);
        self.driver.append(&self.bucket, remote, reader).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StorageError> {
        self.driver.rename(&self.bucket, from, to).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn create_dir(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        self.driver.create_dir(&self.bucket, remote).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_round_trip() {
        let storage: Storage = MemoryStorage::with_buckets(&["registry"]).into();
        let bucket = storage.bucket("registry");
        let path = Utf8Path::new("myapp/blobs/sha256:abc");

        assert!(!bucket.exists(path).await.unwrap());
        bucket.upload_bytes(path, b"layer").await.unwrap();
        assert!(bucket.exists(path).await.unwrap());
        assert_eq!(bucket.download_bytes(path).await.unwrap(), b"layer");
        assert_eq!(storage.name(), "memory");
    }

    #[tokio::test]
    async fn config_builds_memory_storage() {
        let config = StorageConfig::Memory {
            bucket: "registry".into(),
        };
        let storage = config.build().await.unwrap();
        let listed = storage.bucket("registry").list(None).await.unwrap();
        assert!(listed.is_empty());
    }

    #[cfg(feature = "local")]
    #[tokio::test]
    async fn config_creates_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().join("data");
        let config = StorageConfig::Local { path: root.clone() };
        let storage = config.build().await.unwrap();
        assert_eq!(storage.name(), "local");
        assert!(root.is_dir());
    }
}
