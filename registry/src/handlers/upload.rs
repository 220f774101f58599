//! Upload session handlers.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, StatusCode};

use crate::digest::Digest;
use crate::docker::{Docker, DockerExt as _, Upload};
use crate::entity::{FinishQuery, UploadQuery};
use crate::error::RegistryResult;
use crate::headers;
use crate::name::RepoName;

fn session_response(status: StatusCode, repo: &RepoName, upload: &Upload) -> Response {
    let meta = [
        (
            header::LOCATION,
            format!("/v2/{repo}/blobs/uploads/{}", upload.uuid()),
        ),
        (header::RANGE, upload.range()),
        (header::CONTENT_LENGTH, "0".to_string()),
        (headers::UPLOAD_UUID, upload.uuid().to_string()),
    ];
    (status, meta).into_response()
}

fn created_response(repo: &RepoName, digest: &Digest) -> Response {
    let meta = [
        (header::LOCATION, format!("/v2/{repo}/blobs/{digest}")),
        (header::CONTENT_LENGTH, "0".to_string()),
        (headers::CONTENT_DIGEST, digest.to_string()),
    ];
    (StatusCode::CREATED, meta).into_response()
}

/// `POST /v2/{name}/blobs/uploads/`
///
/// Three shapes share this endpoint: the cross-repository mount
/// (`?mount=&from=`), the monolithic single-request upload (`?digest=`),
/// and the plain session open. A mount that cannot be satisfied degrades to
/// a fresh session rather than failing, per the protocol.
pub async fn start(
    docker: &dyn Docker,
    repo: &RepoName,
    query: Option<&str>,
    data: Bytes,
) -> RegistryResult<Response> {
    let query = UploadQuery::parse(query)?;
    let view = docker.repo(repo);

    if let (Some(mount), Some(from)) = (&query.mount, &query.from) {
        let digest: Digest = mount.parse()?;
        let from: RepoName = from.parse()?;
        if let Some(mounted) = view.layers().mount(&digest, &from).await? {
            return Ok(created_response(repo, &mounted));
        }
        // Source did not have the blob: open a session instead.
    }

    let upload = view.uploads().start().await?;

    if let Some(digest) = &query.digest {
        let expected: Digest = digest.parse()?;
        if !data.is_empty() {
            view.uploads().append(upload.uuid(), data).await?;
        }
        let digest = view.uploads().finish(upload.uuid(), &expected).await?;
        return Ok(created_response(repo, &digest));
    }

    Ok(session_response(StatusCode::ACCEPTED, repo, &upload))
}

/// `PATCH /v2/{name}/blobs/uploads/{uuid}`
pub async fn append(
    docker: &dyn Docker,
    repo: &RepoName,
    uuid: &str,
    chunk: Bytes,
) -> RegistryResult<Response> {
    let upload = docker.repo(repo).uploads().append(uuid, chunk).await?;
    Ok(session_response(StatusCode::ACCEPTED, repo, &upload))
}

/// `PUT /v2/{name}/blobs/uploads/{uuid}?digest=`
///
/// The request body, when present, is a final chunk appended before the
/// digest verification.
pub async fn finish(
    docker: &dyn Docker,
    repo: &RepoName,
    uuid: &str,
    query: Option<&str>,
    data: Bytes,
) -> RegistryResult<Response> {
    let expected: Digest = FinishQuery::parse(query)?.digest.parse()?;
    let view = docker.repo(repo);

    if !data.is_empty() {
        view.uploads().append(uuid, data).await?;
    }
    let digest = view.uploads().finish(uuid, &expected).await?;
    Ok(created_response(repo, &digest))
}

/// `GET /v2/{name}/blobs/uploads/{uuid}`
pub async fn status(docker: &dyn Docker, repo: &RepoName, uuid: &str) -> RegistryResult<Response> {
    let upload = docker.repo(repo).uploads().status(uuid).await?;
    Ok(session_response(StatusCode::NO_CONTENT, repo, &upload))
}

/// `DELETE /v2/{name}/blobs/uploads/{uuid}`
pub async fn cancel(docker: &dyn Docker, repo: &RepoName, uuid: &str) -> RegistryResult<Response> {
    docker.repo(repo).uploads().cancel(uuid).await?;
    let meta = [
        (header::CONTENT_LENGTH, "0".to_string()),
        (headers::UPLOAD_UUID, uuid.to_string()),
    ];
    Ok((StatusCode::OK, meta).into_response())
}
