//! Storage keys for a repository's three collections.
//!
//! ```text
//! <repository>/tags/<tag>        manifest bytes, verbatim
//! <repository>/tags/<digest>     alias record pointing at blobs/<digest>
//! <repository>/blobs/<digest>    committed content
//! <repository>/uploads/<id>      staged upload sessions
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use storage::StorageBucket;

use crate::error::RegistryResult;

/// Collection holding tag entries and digest aliases.
pub const TAGS: &str = "tags";
/// Collection holding committed blobs.
pub const BLOBS: &str = "blobs";
/// Collection holding staged upload sessions.
pub const UPLOADS: &str = "uploads";

/// Key builder for one repository. Callers validate the repository name and
/// keys before building paths.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryLayout<'r> {
    repository: &'r str,
}

impl<'r> RepositoryLayout<'r> {
    /// Keys for `repository`.
    pub fn new(repository: &'r str) -> Self {
        Self { repository }
    }

    /// The repository name.
    pub fn repository(&self) -> &'r str {
        self.repository
    }

    fn collection(&self, name: &str) -> Utf8PathBuf {
        Utf8Path::new(self.repository).join(name)
    }

    /// The tag collection, also the listing prefix.
    pub fn tags(&self) -> Utf8PathBuf {
        self.collection(TAGS)
    }

    /// A tag or digest alias entry.
    pub fn tag(&self, key: &str) -> Utf8PathBuf {
        self.tags().join(key)
    }

    /// A committed blob.
    pub fn blob(&self, digest: &str) -> Utf8PathBuf {
        self.collection(BLOBS).join(digest)
    }

    /// A staged upload.
    pub fn upload(&self, session: &str) -> Utf8PathBuf {
        self.collection(UPLOADS).join(session)
    }

    /// Resolve a path stored relative to the repository (as in alias records).
    pub fn resolve(&self, relative: &Utf8Path) -> Utf8PathBuf {
        Utf8Path::new(self.repository).join(relative)
    }

    /// Create the `tags`, `blobs` and `uploads` collections if absent.
    #[tracing::instrument(level = "debug", skip(bucket), fields(repository = self.repository))]
    pub async fn ensure(&self, bucket: &StorageBucket) -> RegistryResult<()> {
        for name in [TAGS, BLOBS, UPLOADS] {
            bucket.create_dir(&self.collection(name)).await?;
        }
        Ok(())
    }
}

/// Split a bucket-relative key `<repository>/<collection>/<entry>`.
pub(crate) fn split_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, '/');
    let repository = parts.next()?;
    let collection = parts.next()?;
    let entry = parts.next()?;
    if entry.contains('/') {
        return None;
    }
    Some((repository, collection, entry))
}

#[cfg(test)]
mod tests {
    use storage::MemoryStorage;

    use super::*;

    #[test]
    fn paths() {
        let layout = RepositoryLayout::new("myapp");
        assert_eq!(layout.tag("latest").as_str(), "myapp/tags/latest");
        assert_eq!(
            layout.tag("sha256:abcdef").as_str(),
            "myapp/tags/sha256:abcdef"
        );
        assert_eq!(layout.blob("sha256:abcdef").as_str(), "myapp/blobs/sha256:abcdef");
        assert_eq!(layout.upload("1234").as_str(), "myapp/uploads/1234");
        assert_eq!(
            layout.resolve(Utf8Path::new("blobs/sha256:ab")).as_str(),
            "myapp/blobs/sha256:ab"
        );
    }

    #[test]
    fn split() {
        assert_eq!(
            split_key("myapp/uploads/abc"),
            Some(("myapp", "uploads", "abc"))
        );
        assert_eq!(split_key("myapp/uploads"), None);
        assert_eq!(split_key("myapp/uploads/a/b"), None);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let storage: storage::Storage = MemoryStorage::new().into();
        let bucket = storage.bucket("registry");
        let layout = RepositoryLayout::new("myapp");
        layout.ensure(&bucket).await.unwrap();
        layout.ensure(&bucket).await.unwrap();
        assert!(bucket.list(None).await.unwrap().is_empty());
    }
}
