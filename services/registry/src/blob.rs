//! Blob and upload session routes

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncBufRead;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::api::{CONTENT_DIGEST, Registry, UPLOAD_UUID};
use crate::error::{RegistryError, RegistryResult};
use crate::storage::BlobStore;
use crate::upload::UploadSessions;
use crate::validate;

/// Router for blob operations
pub(crate) fn router() -> Router<Registry> {
    Router::new()
        .route("/v2/{name}/blobs/{digest}", get(get_blob).head(head_blob))
        .route("/v2/{name}/blobs/uploads/", post(start_blob_upload))
        .route(
            "/v2/{name}/blobs/uploads/{session}",
            patch(patch_blob_upload)
                .put(complete_blob_upload)
                .layer(DefaultBodyLimit::disable()),
        )
}

/// Adapt a request body into a reader that yields each frame as it arrives.
fn body_reader(body: Body) -> impl AsyncBufRead + Unpin + Send {
    StreamReader::new(body.into_data_stream().map_err(std::io::Error::other))
}

/// Stream a blob
async fn get_blob(
    State(blobs): State<BlobStore>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let blob = blobs.read(&name, &digest).await?;
    let body = Body::from_stream(ReaderStream::new(blob.reader));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (header::CONTENT_LENGTH, blob.size.to_string()),
            (CONTENT_DIGEST, digest),
        ],
        body,
    )
        .into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(blobs): State<BlobStore>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let size = blobs.size(&name, &digest).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (header::CONTENT_LENGTH, size.to_string()),
            (CONTENT_DIGEST, digest),
        ],
    )
        .into_response())
}

/// Start a blob upload session
async fn start_blob_upload(
    State(uploads): State<UploadSessions>,
    Path(name): Path<String>,
) -> RegistryResult<Response> {
    let session = match uploads.initiate(&name).await {
        Ok(session) => session,
        Err(RegistryError::NameUnknown(_)) => return Ok(ignored(&name)),
        Err(err) => return Err(err),
    };

    Ok(session_accepted(&name, &session, "0-0".to_owned()))
}

/// Append the request body to an upload session
async fn patch_blob_upload(
    State(uploads): State<UploadSessions>,
    Path((name, session)): Path<(String, String)>,
    body: Body,
) -> RegistryResult<Response> {
    if !validate::repository(&name) {
        return Ok(ignored(&name));
    }

    let progress = uploads
        .append(&name, &session, &mut body_reader(body))
        .await?;
    Ok(session_accepted(&name, &session, progress.range()))
}

#[derive(Debug, Deserialize)]
struct CompleteUpload {
    digest: Option<String>,
}

/// Complete a blob upload
///
/// The body, if any, is appended as the final chunk before verification.
async fn complete_blob_upload(
    State(uploads): State<UploadSessions>,
    Path((name, session)): Path<(String, String)>,
    Query(params): Query<CompleteUpload>,
    body: Body,
) -> RegistryResult<Response> {
    let digest = params
        .digest
        .ok_or_else(|| RegistryError::InvalidDigest("missing digest parameter".to_owned()))?;
    if !validate::digest(&digest) {
        return Err(RegistryError::InvalidDigest(digest));
    }

    uploads
        .append(&name, &session, &mut body_reader(body))
        .await?;
    uploads.finalize(&name, &session, &digest).await?;

    let location = format!("/v2/{name}/blobs/{digest}");
    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_LENGTH, "0".to_owned()),
            (CONTENT_DIGEST, digest),
        ],
    )
        .into_response())
}

fn session_accepted(name: &str, session: &str, range: String) -> Response {
    let location = format!("/v2/{name}/blobs/uploads/{session}");
    (
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, location),
            (header::RANGE, range),
            (UPLOAD_UUID, session.to_owned()),
        ],
    )
        .into_response()
}

/// Uploads against malformed repository names are dropped without a session.
fn ignored(name: &str) -> Response {
    tracing::warn!(repository = %name, "ignoring upload for malformed repository name");
    StatusCode::OK.into_response()
}
