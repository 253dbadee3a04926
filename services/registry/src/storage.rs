//! Content-addressable blob store

use camino::Utf8Path;
use storage::{ReadHandle, StorageBucket};

use crate::error::{RegistryError, RegistryResult};
use crate::layout::RepositoryLayout;
use crate::locks::KeyLocks;
use crate::validate;

/// Committed blobs, keyed by digest within a repository.
///
/// The store never hashes content; callers verify `sha256(bytes) == digest`
/// before calling [`BlobStore::commit`].
#[derive(Clone, Debug)]
pub struct BlobStore {
    bucket: StorageBucket,
    locks: KeyLocks,
}

/// An open blob ready to be streamed.
pub struct BlobReader {
    /// Size in bytes.
    pub size: u64,
    /// Content stream.
    pub reader: ReadHandle,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl BlobStore {
    /// Create a blob store over a storage bucket.
    pub fn new(bucket: StorageBucket, locks: KeyLocks) -> Self {
        Self { bucket, locks }
    }

    /// Check whether a blob has been committed.
    ///
    /// Malformed names simply do not exist.
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, repository: &str, digest: &str) -> RegistryResult<bool> {
        if !(validate::repository(repository) && validate::digest(digest)) {
            return Ok(false);
        }
        let path = RepositoryLayout::new(repository).blob(digest);
        Ok(self.bucket.exists(&path).await?)
    }

    /// Size of a committed blob.
    #[tracing::instrument(skip(self))]
    pub async fn size(&self, repository: &str, digest: &str) -> RegistryResult<u64> {
        self.check(repository, digest)?;
        let path = RepositoryLayout::new(repository).blob(digest);
        let metadata = self
            .bucket
            .metadata(&path)
            .await
            .map_err(|err| not_found(err, repository, digest))?;
        Ok(metadata.size)
    }

    /// Open a committed blob for streaming.
    #[tracing::instrument(skip(self))]
    pub async fn read(&self, repository: &str, digest: &str) -> RegistryResult<BlobReader> {
        self.check(repository, digest)?;
        let path = RepositoryLayout::new(repository).blob(digest);

        let metadata = self
            .bucket
            .metadata(&path)
            .await
            .map_err(|err| not_found(err, repository, digest))?;
        let reader = self
            .bucket
            .open(&path)
            .await
            .map_err(|err| not_found(err, repository, digest))?;

        Ok(BlobReader {
            size: metadata.size,
            reader,
        })
    }

    /// Read a committed blob fully into memory.
    pub async fn read_bytes(&self, repository: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        self.check(repository, digest)?;
        let path = RepositoryLayout::new(repository).blob(digest);
        self.bucket
            .download_bytes(&path)
            .await
            .map_err(|err| not_found(err, repository, digest))
    }

    /// Move staged bytes into the blob namespace under `digest`.
    ///
    /// The caller must already have verified the staged content hashes to
    /// `digest`. Committing identical content under an existing digest is
    /// harmless: the rename replaces the file atomically.
    #[tracing::instrument(skip(self))]
    pub async fn commit(
        &self,
        repository: &str,
        staging: &Utf8Path,
        digest: &str,
    ) -> RegistryResult<()> {
        if !validate::digest(digest) {
            return Err(RegistryError::InvalidDigest(digest.to_owned()));
        }
        let target = RepositoryLayout::new(repository).blob(digest);

        let _guard = self.locks.lock(&target).await;
        self.bucket.rename(staging, &target).await?;
        tracing::debug!(%digest, "committed blob");
        Ok(())
    }

    fn check(&self, repository: &str, digest: &str) -> RegistryResult<()> {
        if validate::repository(repository) && validate::digest(digest) {
            Ok(())
        } else {
            tracing::debug!(%repository, %digest, "malformed blob reference");
            Err(RegistryError::BlobNotFound(format!("{repository}/{digest}")))
        }
    }
}

fn not_found(err: storage::StorageError, repository: &str, digest: &str) -> RegistryError {
    if err.is_not_found() {
        RegistryError::BlobNotFound(format!("{repository}/{digest}"))
    } else {
        err.into()
    }
}
