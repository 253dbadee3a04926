use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::StorageError;

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// An owned reader over a stored object, returned by [`Driver::open`].
pub type ReadHandle = Box<dyn io::AsyncRead + Unpin + Send + Sync + 'static>;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a storage backend.
///
/// Objects are addressed by a bucket name and a `/`-separated path inside the bucket.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug + Send + Sync {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete a file from the storage, by path.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Check whether a file exists, without reading it.
    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(bucket, remote).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Upload a file to the storage, using a reader stream to provide the contents.
    ///
    /// Replaces any existing file at the same path.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// Open a file for streaming reads.
    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadHandle, StorageError>;

    /// Append the reader's contents to the end of an existing file.
    ///
    /// Fails with a not-found error if the file does not exist.
    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Atomically move a file, replacing any file already at the destination.
    ///
    /// Readers of `to` observe either the previous contents or the complete
    /// new contents, never a partial file.
    async fn rename(&self, bucket: &str, from: &Utf8Path, to: &Utf8Path)
        -> Result<(), StorageError>;

    /// Create a directory-like collection, and its parents, if absent.
    ///
    /// Drivers without a directory concept accept this as a no-op.
    async fn create_dir(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let _ = (bucket, remote);
        Ok(())
    }

    /// List the files in a bucket, optionally filtered by a prefix.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        self.deref().exists(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadHandle, StorageError> {
        self.deref().open(bucket, remote).await
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().append(bucket, remote, reader).await
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().rename(bucket, from, to).await
    }

    async fn create_dir(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().create_dir(bucket, remote).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Driver);
    static_assertions::assert_impl_all!(Arc<dyn Driver>: Driver, Send, Sync);
}
