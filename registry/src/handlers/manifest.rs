//! Manifest fetch and push handlers.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, StatusCode};

use crate::docker::{Docker, DockerExt as _};
use crate::error::{Error, RegistryResult};
use crate::headers;
use crate::name::{Reference, RepoName};

/// `GET`/`HEAD /v2/{name}/manifests/{reference}`
pub async fn get(
    docker: &dyn Docker,
    repo: &RepoName,
    reference: &Reference,
    head: bool,
) -> RegistryResult<Response> {
    let Some(manifest) = docker.repo(repo).manifests().get(reference).await? else {
        return Err(Error::ManifestUnknown(reference.to_string()));
    };

    let meta = [
        (header::CONTENT_TYPE, manifest.media_type()),
        (header::CONTENT_LENGTH, manifest.size().to_string()),
        (headers::CONTENT_DIGEST, manifest.digest().to_string()),
    ];

    let body = if head {
        Body::empty()
    } else {
        Body::from(manifest.into_data())
    };
    Ok((StatusCode::OK, meta, body).into_response())
}

/// `PUT /v2/{name}/manifests/{reference}`
pub async fn put(
    docker: &dyn Docker,
    repo: &RepoName,
    reference: &Reference,
    data: Bytes,
) -> RegistryResult<Response> {
    let digest = docker.repo(repo).manifests().put(reference, data).await?;

    let meta = [
        (header::LOCATION, format!("/v2/{repo}/manifests/{digest}")),
        (header::CONTENT_LENGTH, "0".to_string()),
        (headers::CONTENT_DIGEST, digest.to_string()),
    ];
    Ok((StatusCode::CREATED, meta).into_response())
}
