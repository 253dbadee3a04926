//! Manifest and tag listing routes

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;

use crate::api::{CONTENT_DIGEST, Registry};
use crate::error::RegistryResult;
use crate::tags::ManifestStore;

/// Router for manifest operations
pub(crate) fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest).head(head_manifest).put(put_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Every `Accept` header value, in request order.
fn accepted(headers: &HeaderMap) -> Vec<&str> {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect()
}

/// Get a manifest by tag or digest
async fn get_manifest(
    State(manifests): State<ManifestStore>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let manifest = manifests
        .get(&name, &reference, &accepted(&headers))
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type.to_owned()),
            (header::CONTENT_LENGTH, manifest.content.len().to_string()),
            (CONTENT_DIGEST, manifest.digest),
        ],
        manifest.content,
    )
        .into_response())
}

/// Check if a manifest exists
async fn head_manifest(
    State(manifests): State<ManifestStore>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let descriptor = manifests.head(&name, &reference).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, descriptor.size.to_string()),
            (CONTENT_DIGEST, descriptor.digest),
        ],
    )
        .into_response())
}

/// Store a manifest under a tag
async fn put_manifest(
    State(manifests): State<ManifestStore>,
    Path((name, tag)): Path<(String, String)>,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest = manifests.put(&name, &tag, &body).await?;
    let location = format!("/v2/{name}/manifests/{digest}");

    Ok((
        StatusCode::OK,
        [(header::LOCATION, location), (CONTENT_DIGEST, digest)],
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// List the tags of a repository
async fn list_tags(
    State(manifests): State<ManifestStore>,
    Path(name): Path<String>,
) -> RegistryResult<Json<TagList>> {
    let tags = manifests.list_tags(&name).await?;
    Ok(Json(TagList { name, tags }))
}
