//! Manifest and tag store.
//!
//! A manifest is written verbatim under its tag and committed as a blob under
//! its digest. The digest key in the tags collection is an alias record that
//! points at that blob, so a manifest can be fetched by tag or by digest and
//! re-tagging never changes what an earlier digest resolves to.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use storage::StorageBucket;
use uuid::Uuid;

use crate::digest::sha256_digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{self, RepositoryLayout};
use crate::locks::KeyLocks;
use crate::negotiate::negotiate;
use crate::storage::BlobStore;
use crate::validate;

/// Secondary key record: the digest entry resolves to `target`, a path
/// relative to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AliasRecord {
    target: Utf8PathBuf,
}

impl AliasRecord {
    fn blob(digest: &str) -> Self {
        Self {
            target: Utf8Path::new(layout::BLOBS).join(digest),
        }
    }

    /// Only aliases into the blob collection are honoured.
    fn is_blob_alias(&self) -> bool {
        self.target.parent() == Some(Utf8Path::new(layout::BLOBS))
            && self.target.file_name().is_some_and(validate::digest)
    }
}

/// A manifest returned by [`ManifestStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Negotiated response media type.
    pub media_type: &'static str,
    /// Digest of `content`.
    pub digest: String,
    /// Stored bytes, unmodified.
    pub content: Vec<u8>,
}

/// Existence information returned by [`ManifestStore::head`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    /// Digest of the stored bytes.
    pub digest: String,
    /// Size of the stored bytes.
    pub size: u64,
}

/// Where a reference's manifest bytes live, and their digest when the
/// reference already names it.
#[derive(Debug)]
struct Resolved {
    path: Utf8PathBuf,
    digest: Option<String>,
}

fn manifest_error(err: storage::StorageError, repository: &str, reference: &str) -> RegistryError {
    if err.is_not_found() {
        RegistryError::ManifestNotFound(format!("{repository}/{reference}"))
    } else {
        err.into()
    }
}

/// Stores manifests under tags with digest aliases.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    bucket: StorageBucket,
    blobs: BlobStore,
    locks: KeyLocks,
}

impl ManifestStore {
    /// Create the manifest store.
    pub fn new(bucket: StorageBucket, blobs: BlobStore, locks: KeyLocks) -> Self {
        Self {
            bucket,
            blobs,
            locks,
        }
    }

    /// Write `data` through the staging collection and rename it into place,
    /// so readers never see a partial entry.
    async fn write_entry(
        &self,
        layout: &RepositoryLayout<'_>,
        target: &Utf8Path,
        data: &[u8],
    ) -> RegistryResult<()> {
        let staging = layout.upload(&Uuid::new_v4().hyphenated().to_string());
        self.bucket.upload_bytes(&staging, data).await?;
        self.bucket.rename(&staging, target).await?;
        Ok(())
    }

    /// Store `data` under `tag`, returning its digest.
    ///
    /// Last writer wins for the tag. The digest alias is created only if
    /// absent.
    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    pub async fn put(&self, repository: &str, tag: &str, data: &[u8]) -> RegistryResult<String> {
        if !validate::repository(repository) {
            return Err(RegistryError::InvalidRepository(repository.to_owned()));
        }
        if !validate::tag(tag) {
            return Err(RegistryError::InvalidTag(tag.to_owned()));
        }

        let layout = RepositoryLayout::new(repository);
        layout.ensure(&self.bucket).await?;

        let digest = sha256_digest(data);

        if !self.blobs.exists(repository, &digest).await? {
            let staging = layout.upload(&Uuid::new_v4().hyphenated().to_string());
            self.bucket.upload_bytes(&staging, data).await?;
            self.blobs.commit(repository, &staging, &digest).await?;
        }

        {
            let path = layout.tag(tag);
            let _guard = self.locks.lock(&path).await;
            self.write_entry(&layout, &path, data).await?;
        }

        {
            let path = layout.tag(&digest);
            let _guard = self.locks.lock(&path).await;
            if !self.bucket.exists(&path).await? {
                let record = serde_json::to_vec(&AliasRecord::blob(&digest))?;
                self.write_entry(&layout, &path, &record).await?;
                tracing::debug!(%digest, "created digest alias");
            }
        }

        tracing::info!(%tag, %digest, "stored manifest");
        Ok(digest)
    }

    /// Resolve a tag or digest to the storage path holding the manifest bytes.
    async fn resolve(&self, repository: &str, reference: &str) -> RegistryResult<Resolved> {
        let not_found = || RegistryError::ManifestNotFound(format!("{repository}/{reference}"));

        if !(validate::repository(repository)
            && (validate::tag(reference) || validate::digest(reference)))
        {
            tracing::debug!(%repository, %reference, "malformed manifest reference");
            return Err(not_found());
        }

        let layout = RepositoryLayout::new(repository);
        let key = layout.tag(reference);

        // Tags cannot contain ':', so any such key is a digest alias.
        if !reference.contains(':') {
            return Ok(Resolved {
                path: key,
                digest: None,
            });
        }

        let raw = match self.bucket.download_bytes(&key).await {
            Ok(raw) => raw,
            Err(err) if err.is_not_found() => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };
        let record: AliasRecord = serde_json::from_slice(&raw)?;
        if !record.is_blob_alias() {
            tracing::error!(%reference, target = %record.target, "alias record points outside blobs");
            return Err(not_found());
        }
        Ok(Resolved {
            path: layout.resolve(&record.target),
            digest: Some(reference.to_owned()),
        })
    }

    /// Fetch a manifest by tag or digest, negotiating the response media type
    /// from the client's acceptable types.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        repository: &str,
        reference: &str,
        accept: &[&str],
    ) -> RegistryResult<Manifest> {
        let resolved = self.resolve(repository, reference).await?;
        let content = self
            .bucket
            .download_bytes(&resolved.path)
            .await
            .map_err(|err| manifest_error(err, repository, reference))?;

        let media_type = negotiate(accept.iter().copied())?;

        Ok(Manifest {
            media_type,
            digest: resolved
                .digest
                .unwrap_or_else(|| sha256_digest(&content)),
            content,
        })
    }

    /// Check that a manifest exists, without negotiating a media type.
    ///
    /// A digest reference is answered from metadata alone; a tag has to be
    /// read to learn its digest.
    #[tracing::instrument(skip(self))]
    pub async fn head(
        &self,
        repository: &str,
        reference: &str,
    ) -> RegistryResult<ManifestDescriptor> {
        let resolved = self.resolve(repository, reference).await?;
        match resolved.digest {
            Some(digest) => {
                let metadata = self
                    .bucket
                    .metadata(&resolved.path)
                    .await
                    .map_err(|err| manifest_error(err, repository, reference))?;
                Ok(ManifestDescriptor {
                    digest,
                    size: metadata.size,
                })
            }
            None => {
                let content = self
                    .bucket
                    .download_bytes(&resolved.path)
                    .await
                    .map_err(|err| manifest_error(err, repository, reference))?;
                Ok(ManifestDescriptor {
                    digest: sha256_digest(&content),
                    size: content.len() as u64,
                })
            }
        }
    }

    /// List the tags of a repository, sorted. Digest aliases are omitted.
    #[tracing::instrument(skip(self))]
    pub async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        if !validate::repository(repository) {
            return Err(RegistryError::NameUnknown(repository.to_owned()));
        }

        let prefix = RepositoryLayout::new(repository).tags();
        let entries = match self.bucket.list(Some(&prefix)).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let mut tags: Vec<String> = entries
            .iter()
            .filter_map(|entry| Utf8Path::new(entry).strip_prefix(&prefix).ok())
            .map(|tag| tag.as_str())
            .filter(|tag| validate::tag(tag))
            .map(str::to_owned)
            .collect();
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use storage::MemoryStorage;

    use super::*;
    use crate::negotiate::{DOCKER_MANIFEST_V2, OCI_MANIFEST};

    fn test_store() -> (StorageBucket, ManifestStore) {
        let storage: storage::Storage = MemoryStorage::with_buckets(&["test"]).into();
        let bucket = storage.bucket("test");
        let locks = KeyLocks::new();
        let blobs = BlobStore::new(bucket.clone(), locks.clone());
        (bucket.clone(), ManifestStore::new(bucket, blobs, locks))
    }

    const ACCEPT_OCI: &[&str] = &[OCI_MANIFEST];

    #[tokio::test]
    async fn tag_and_digest_resolve_to_same_bytes() {
        let (_bucket, store) = test_store();
        let manifest = br#"{"schemaVersion":2}"#;

        let digest = store.put("myapp", "latest", manifest).await.unwrap();
        assert_eq!(digest, sha256_digest(manifest));

        let by_tag = store.get("myapp", "latest", ACCEPT_OCI).await.unwrap();
        assert_eq!(by_tag.content, manifest);
        assert_eq!(by_tag.media_type, OCI_MANIFEST);
        assert_eq!(by_tag.digest, digest);

        let by_digest = store.get("myapp", &digest, ACCEPT_OCI).await.unwrap();
        assert_eq!(by_digest.content, manifest);

        let head = store.head("myapp", &digest).await.unwrap();
        assert_eq!(head.size, manifest.len() as u64);
    }

    #[tokio::test]
    async fn head_by_tag_and_digest_agree() {
        let (bucket, store) = test_store();
        let manifest = br#"{"schemaVersion":2,"layers":[]}"#;
        let digest = store.put("myapp", "v1", manifest).await.unwrap();

        let by_tag = store.head("myapp", "v1").await.unwrap();
        let by_digest = store.head("myapp", &digest).await.unwrap();
        assert_eq!(by_tag, by_digest);
        assert_eq!(by_digest.digest, digest);
        assert_eq!(by_digest.size, manifest.len() as u64);

        // A digest lookup goes through the committed blob, not the tag.
        bucket
            .delete(&RepositoryLayout::new("myapp").blob(&digest))
            .await
            .unwrap();
        let err = store.head("myapp", &digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestNotFound(_)));
        assert_eq!(store.head("myapp", "v1").await.unwrap(), by_tag);
    }

    #[tokio::test]
    async fn manifest_is_also_a_blob() {
        let (bucket, store) = test_store();
        let manifest = br#"{"schemaVersion":2}"#;
        let digest = store.put("myapp", "v1", manifest).await.unwrap();

        let blobs = BlobStore::new(bucket, KeyLocks::new());
        assert_eq!(blobs.read_bytes("myapp", &digest).await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn retagging_keeps_old_digest() {
        let (_bucket, store) = test_store();
        let first = store.put("myapp", "latest", b"first").await.unwrap();
        let second = store.put("myapp", "latest", b"second").await.unwrap();

        let latest = store.get("myapp", "latest", ACCEPT_OCI).await.unwrap();
        assert_eq!(latest.content, b"second");
        let old = store.get("myapp", &first, ACCEPT_OCI).await.unwrap();
        assert_eq!(old.content, b"first");
        let new = store.get("myapp", &second, ACCEPT_OCI).await.unwrap();
        assert_eq!(new.content, b"second");
    }

    #[tokio::test]
    async fn same_content_under_two_tags() {
        let (_bucket, store) = test_store();
        let a = store.put("myapp", "a", b"content").await.unwrap();
        let b = store.put("myapp", "b", b"content").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_tags("myapp").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn not_found() {
        let (_bucket, store) = test_store();
        let err = store.get("myapp", "latest", ACCEPT_OCI).await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestNotFound(_)));

        store.put("myapp", "latest", b"{}").await.unwrap();
        let missing = sha256_digest(b"missing");
        for reference in ["missing", missing.as_str(), "..", "bad/ref", "a-b"] {
            let err = store.head("myapp", reference).await.unwrap_err();
            assert!(
                matches!(err, RegistryError::ManifestNotFound(_)),
                "{reference}: {err:?}"
            );
        }

        let err = store.head("my app", "latest").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_put_changes_nothing() {
        let (bucket, store) = test_store();
        let err = store.put("my1app", "latest", b"{}").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRepository(_)));
        let err = store.put("myapp", "v1:2", b"{}").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTag(_)));
        let err = store.put("myapp", "..", b"{}").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTag(_)));

        assert!(bucket.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negotiation() {
        let (_bucket, store) = test_store();
        store.put("myapp", "latest", b"{}").await.unwrap();

        let manifest = store
            .get("myapp", "latest", &["text/plain", DOCKER_MANIFEST_V2])
            .await
            .unwrap();
        assert_eq!(manifest.media_type, DOCKER_MANIFEST_V2);

        let err = store
            .get("myapp", "latest", &["text/plain"])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAcceptable(_)));
    }

    #[tokio::test]
    async fn staging_is_cleaned_up_by_put() {
        let (bucket, store) = test_store();
        store.put("myapp", "latest", b"{}").await.unwrap();

        let uploads = bucket
            .list(Some(Utf8Path::new("myapp/uploads")))
            .await
            .unwrap();
        assert!(uploads.is_empty(), "{uploads:?}");
    }
}
