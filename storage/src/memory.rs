use std::collections::HashMap;
use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{
    Driver, Metadata, ReadHandle, Reader, StorageError, StorageErrorKind, Writer,
};

const ENGINE: &str = "memory";

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        ),
    )
    .bucket(bucket)
    .context("bucket not found")
    .build()
}

fn path_not_found(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Path not found: {remote}"),
        ),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .context("path not found")
    .build()
}

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores files in memory.
///
/// All mutations take the write lock for their whole duration, so renames are
/// trivially atomic with respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Backdate an object's creation time. Only meant for exercising expiry logic.
    #[doc(hidden)]
    pub async fn set_created(&self, bucket: &str, remote: &Utf8Path, created: DateTime<Utc>) {
        let mut buckets = self.buckets.write().await;
        if let Some(item) = buckets.get_mut(bucket).and_then(|b| b.get_mut(remote)) {
            item.created = created;
        }
    }
}

async fn read_all(reader: &mut Reader<'_>) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();

    tokio::io::copy(reader, &mut buf)
        .await
        .map_err(|err| StorageError::io(ENGINE, err))?;

    buf.shutdown()
        .await
        .map_err(|err| StorageError::io(ENGINE, err))?;

    Ok(buf)
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        bucket_map.remove(remote);

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let buf = read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let mut buf = bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .as_ref();

        tokio::io::copy(&mut buf, local)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadHandle, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let data = bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .data
            .clone();

        Ok(Box::new(Cursor::new(data)))
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let chunk = read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let item = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?
            .get_mut(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?;
        item.data.extend_from_slice(&chunk);

        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let item = bucket_map
            .remove(from)
            .ok_or_else(|| path_not_found(bucket, from))?;
        bucket_map.insert(to.to_owned(), item);

        Ok(())
    }

    async fn create_dir(&self, bucket: &str, _remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;

        let mut paths = Vec::new();
        for path in bucket_map.keys() {
            if let Some(prefix) = prefix {
                if path.starts_with(prefix) {
                    paths.push(path.to_string());
                }
            } else {
                paths.push(path.to_string());
            }
        }

        Ok(paths)
    }
}
