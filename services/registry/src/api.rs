//! API server builder and router

use axum::Router;
use axum::extract::FromRef;
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::locks::KeyLocks;
use crate::storage::BlobStore;
use crate::tags::ManifestStore;
use crate::upload::UploadSessions;

/// Bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "registry";

pub(crate) const API_VERSION: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");
pub(crate) const CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");
pub(crate) const UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Registry builder for configuring and creating the OCI registry service
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Assemble the registry state without wrapping it in a router.
    ///
    /// Without a configured backend, everything is kept in memory.
    pub fn registry(self) -> Registry {
        let bucket = self.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_owned());
        let storage = self
            .storage
            .unwrap_or_else(|| storage::MemoryStorage::with_buckets(&[bucket.as_str()]).into());
        tracing::debug!(driver = storage.name(), %bucket, "registry storage");
        Registry::new(storage.bucket(bucket))
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        self.registry().router()
    }
}

/// Shared state behind every registry route.
///
/// All three stores see the same bucket and the same lock table, so a
/// commit from an upload and a manifest write never race on one key.
#[derive(Debug, Clone)]
pub struct Registry {
    blobs: BlobStore,
    uploads: UploadSessions,
    manifests: ManifestStore,
}

impl Registry {
    /// Create the stores over one storage bucket.
    pub fn new(bucket: storage::StorageBucket) -> Self {
        let locks = KeyLocks::new();
        let blobs = BlobStore::new(bucket.clone(), locks.clone());
        let uploads = UploadSessions::new(bucket.clone(), blobs.clone(), locks.clone());
        let manifests = ManifestStore::new(bucket, blobs.clone(), locks);
        Self {
            blobs,
            uploads,
            manifests,
        }
    }

    /// Committed blobs.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Upload sessions, e.g. for periodic sweeping.
    pub fn uploads(&self) -> &UploadSessions {
        &self.uploads
    }

    /// Tags and manifests.
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// The HTTP surface over this registry.
    pub fn router(self) -> Router {
        Router::new()
            .route("/v2/", get(api_version_check))
            .merge(crate::blob::router())
            .merge(crate::manifest::router())
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

impl FromRef<Registry> for BlobStore {
    fn from_ref(input: &Registry) -> Self {
        input.blobs.clone()
    }
}

impl FromRef<Registry> for UploadSessions {
    fn from_ref(input: &Registry) -> Self {
        input.uploads.clone()
    }
}

impl FromRef<Registry> for ManifestStore {
    fn from_ref(input: &Registry) -> Self {
        input.manifests.clone()
    }
}

/// API version check endpoint
///
/// Returns 200 OK with an empty body to indicate the registry is available
async fn api_version_check() -> impl IntoResponse {
    (StatusCode::OK, [(API_VERSION, "registry/2.0")])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_bucket() {
        let storage = storage::MemoryStorage::with_buckets(&["test"]);
        let registry = RegistryBuilder::new()
            .storage(storage.into())
            .bucket("test")
            .registry();

        let digest = registry
            .manifests()
            .put("myapp", "v1", b"{}")
            .await
            .unwrap();
        assert!(registry.blobs().exists("myapp", &digest).await.unwrap());
    }

    #[test]
    fn defaults_to_memory() {
        let _router = RegistryBuilder::new().build();
    }
}
