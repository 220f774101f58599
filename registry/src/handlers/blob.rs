//! Blob fetch handlers.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};

use crate::digest::Digest;
use crate::docker::{Docker, DockerExt as _};
use crate::error::{Error, RegistryResult};
use crate::headers;
use crate::name::RepoName;

/// `GET`/`HEAD /v2/{name}/blobs/{digest}`
pub async fn get(
    docker: &dyn Docker,
    repo: &RepoName,
    digest: &Digest,
    head: bool,
) -> RegistryResult<Response> {
    let Some(blob) = docker.repo(repo).layers().get(digest).await? else {
        return Err(Error::BlobUnknown(digest.to_string()));
    };

    let meta = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, blob.size().to_string()),
        (headers::CONTENT_DIGEST, blob.digest().to_string()),
    ];

    let body = if head {
        Body::empty()
    } else {
        Body::from(blob.into_data())
    };
    Ok((StatusCode::OK, meta, body).into_response())
}
