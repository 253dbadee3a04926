//! Chunked blob upload sessions.
//!
//! A session is an object in the repository's `uploads` collection. It is
//! created empty, grows by appends, and on finalize is either renamed into
//! the blob store (digest verified) or left in place for [`UploadSessions::sweep`].

use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use storage::StorageBucket;
use tokio::io::AsyncBufRead;
use uuid::Uuid;

use crate::digest::sha256_digest_reader;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{self, RepositoryLayout};
use crate::locks::KeyLocks;
use crate::storage::BlobStore;
use crate::validate;

/// Drives the initiate → append → finalize protocol.
#[derive(Clone, Debug)]
pub struct UploadSessions {
    bucket: StorageBucket,
    blobs: BlobStore,
    locks: KeyLocks,
}

/// Progress of a session after an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    /// Session identifier.
    pub session: String,
    /// Total bytes staged so far.
    pub size: u64,
}

impl UploadProgress {
    /// The `Range` header value describing the staged bytes.
    pub fn range(&self) -> String {
        format!("0-{}", self.size.saturating_sub(1))
    }
}

impl UploadSessions {
    /// Create the session manager.
    pub fn new(bucket: StorageBucket, blobs: BlobStore, locks: KeyLocks) -> Self {
        Self {
            bucket,
            blobs,
            locks,
        }
    }

    /// Parse a client-supplied session ID into its staging path.
    ///
    /// Only IDs this registry could have issued are accepted.
    fn staging(&self, repository: &str, session: &str) -> RegistryResult<Utf8PathBuf> {
        let unknown = || RegistryError::UploadNotFound(format!("{repository}/{session}"));
        if !validate::repository(repository) {
            return Err(unknown());
        }
        let id = Uuid::parse_str(session).map_err(|_| unknown())?;
        Ok(RepositoryLayout::new(repository).upload(&id.hyphenated().to_string()))
    }

    /// Start a new session, returning its ID.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(&self, repository: &str) -> RegistryResult<String> {
        if !validate::repository(repository) {
            return Err(RegistryError::NameUnknown(repository.to_owned()));
        }

        let layout = RepositoryLayout::new(repository);
        layout.ensure(&self.bucket).await?;

        let session = Uuid::new_v4().hyphenated().to_string();
        self.bucket
            .upload_bytes(&layout.upload(&session), &[])
            .await?;

        tracing::debug!(%session, "upload session started");
        Ok(session)
    }

    /// Append everything `chunk` yields to the end of a session's staged
    /// bytes. The chunk is streamed to storage, never buffered whole.
    #[tracing::instrument(skip(self, chunk))]
    pub async fn append<R>(
        &self,
        repository: &str,
        session: &str,
        chunk: &mut R,
    ) -> RegistryResult<UploadProgress>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let staging = self.staging(repository, session)?;
        let _guard = self.locks.lock(&staging).await;

        self.bucket
            .append(&staging, chunk)
            .await
            .map_err(|err| session_error(err, repository, session))?;

        let metadata = self
            .bucket
            .metadata(&staging)
            .await
            .map_err(|err| session_error(err, repository, session))?;

        Ok(UploadProgress {
            session: session.to_owned(),
            size: metadata.size,
        })
    }

    /// Verify the staged bytes against `digest` and commit them as a blob.
    ///
    /// On a mismatch nothing is committed and the staged bytes stay where
    /// they are.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(
        &self,
        repository: &str,
        session: &str,
        digest: &str,
    ) -> RegistryResult<()> {
        let staging = self.staging(repository, session)?;
        if !validate::digest(digest) {
            return Err(RegistryError::InvalidDigest(digest.to_owned()));
        }

        let _guard = self.locks.lock(&staging).await;

        let mut reader = self
            .bucket
            .open(&staging)
            .await
            .map_err(|err| session_error(err, repository, session))?;
        let actual = sha256_digest_reader(&mut reader).await?;
        drop(reader);

        if actual != digest {
            tracing::warn!(expected = %digest, %actual, "upload digest mismatch");
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_owned(),
                actual,
            });
        }

        self.blobs.commit(repository, &staging, digest).await?;
        tracing::info!(%digest, "blob upload complete");
        Ok(())
    }

    /// Delete staged sessions created more than `max_age` ago, in every
    /// repository. Returns the number of sessions removed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, max_age: Duration) -> RegistryResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let entries = match self.bucket.list(None).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let Some((repository, collection, session)) = layout::split_key(&entry) else {
                continue;
            };
            if collection != layout::UPLOADS {
                continue;
            }

            let staging = RepositoryLayout::new(repository).upload(session);
            let _guard = self.locks.lock(&staging).await;

            let metadata = match self.bucket.metadata(&staging).await {
                Ok(metadata) => metadata,
                // Finalized while we were listing.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };
            if metadata.created >= cutoff {
                continue;
            }

            match self.bucket.delete(&staging).await {
                Ok(()) => removed += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            tracing::debug!(%repository, %session, created = %metadata.created, "expired upload session");
        }

        let pruned = self.locks.prune();
        tracing::info!(removed, pruned, "swept upload sessions");
        Ok(removed)
    }
}

fn session_error(err: storage::StorageError, repository: &str, session: &str) -> RegistryError {
    if err.is_not_found() {
        RegistryError::UploadNotFound(format!("{repository}/{session}"))
    } else {
        err.into()
    }
}
