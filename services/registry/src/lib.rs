//! # OCI Distribution Registry
//!
//! A small registry server speaking the push/pull subset of the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Content-addressed blob storage, verified by SHA-256 digest
//! - Chunked upload sessions with expiry of abandoned sessions
//! - Manifests stored under tags, retrievable by tag or by digest
//! - Manifest media type negotiation (OCI preferred over Docker v2)
//! - Pluggable storage backend via the `storage` crate
//!
//! Each repository is a directory in the storage bucket:
//!
//! ```text
//! <repository>/
//!     tags/      tag -> manifest bytes, digest -> alias record
//!     blobs/     digest -> blob bytes
//!     uploads/   session id -> staged bytes
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use distribution::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let app = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod config;
mod digest;
mod error;
mod layout;
mod locks;
mod manifest;
mod negotiate;
mod storage;
mod tags;
mod upload;
pub mod validate;

pub use api::{DEFAULT_BUCKET, Registry, RegistryBuilder};
#[cfg(feature = "cli")]
pub use config::ConfigError;
pub use config::{RegistryConfig, UploadPolicy};
pub use digest::{ALGORITHM, sha256_digest, sha256_digest_reader};
pub use error::{RegistryError, RegistryResult};
pub use layout::RepositoryLayout;
pub use locks::KeyLocks;
pub use negotiate::{
    DOCKER_MANIFEST_V2, MANIFEST_MEDIA_TYPES, NegotiationFailure, OCI_MANIFEST, negotiate,
};
pub use self::storage::{BlobReader, BlobStore};
pub use tags::{Manifest, ManifestDescriptor, ManifestStore};
pub use upload::{UploadProgress, UploadSessions};
