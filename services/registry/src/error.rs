//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found, or the request named it with a malformed repository or digest
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found, or the request named it with a malformed repository or reference
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Upload session unknown to this repository
    #[error("upload session not found: {0}")]
    UploadNotFound(String),

    /// Repository name rejected on manifest upload
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Tag rejected on manifest upload
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Missing or malformed digest on upload completion
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Uploaded content does not hash to the asserted digest
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest asserted by the client
        expected: String,
        /// Digest of the staged content
        actual: String,
    },

    /// None of the client's acceptable media types can be produced
    #[error("no acceptable manifest media type in: {0}")]
    NotAcceptable(String),

    /// Repository name rejected on a listing request
    #[error("unknown repository: {0}")]
    NameUnknown(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Stored record could not be decoded
    #[error("corrupt record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::UploadNotFound(_)
            | RegistryError::NameUnknown(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            RegistryError::InvalidRepository(_)
            | RegistryError::InvalidTag(_)
            | RegistryError::Storage(_)
            | RegistryError::Serialization(_)
            | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound(_) => "MANIFEST_UNKNOWN",
            RegistryError::UploadNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::InvalidTag(_) => "TAG_INVALID",
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::NotAcceptable(_) => "MANIFEST_UNACCEPTABLE",
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::Storage(_) | RegistryError::Serialization(_) | RegistryError::Io(_) => {
                "UNKNOWN"
            }
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(%code, error = %message, "request failed");
        } else {
            tracing::debug!(%code, error = %message, "request rejected");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            RegistryError::InvalidTag("..".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RegistryError::DigestMismatch {
                expected: "sha256:00".into(),
                actual: "sha256:11".into(),
            }
            .error_code(),
            "DIGEST_INVALID"
        );
        assert_eq!(
            RegistryError::NotAcceptable("text/html".into()).status_code(),
            StatusCode::NOT_ACCEPTABLE
        );
    }

    #[test]
    fn storage_not_found_is_a_server_fault_unless_classified() {
        let err: RegistryError = storage::StorageError::io(
            "memory",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        )
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
