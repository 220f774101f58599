//! A registry client: the `Docker` contract over upstream HTTP.

use bytes::Bytes;
use http::uri::PathAndQuery;
use http::{header, Method, StatusCode, Uri};
use http_body_util::BodyExt as _;
use hyperdriver::client::SharedClientService;
use hyperdriver::service::SharedService;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use tower::ServiceExt as _;

use crate::digest::Digest;
use crate::docker::{Blob, Docker, Manifest, Upload, UploadState};
use crate::error::{Error, RegistryResult};
use crate::headers;
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// Accept values offered on manifest fetches.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Deserialize)]
struct CatalogPage {
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    tags: Option<Vec<String>>,
}

/// Implements the registry contract against an upstream v2 registry.
///
/// Each operation is one or more HTTP calls; upstream 404s map to the same
/// absent results a local miss would produce, and transport failures surface
/// as [`Error::Upstream`]. The client is owned, not global, so tests can
/// inject any `tower` service in its place.
#[derive(Debug, Clone)]
pub struct ProxyDocker {
    upstream: Uri,
    service: SharedClientService<hyperdriver::Body, hyperdriver::Body>,
}

impl ProxyDocker {
    /// Connect to the registry at `upstream` over TCP with TLS support.
    pub fn new(upstream: Uri) -> Self {
        let service = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();
        Self { upstream, service }
    }

    /// Use an explicit inner service, for tests and instrumentation.
    pub fn new_with_inner_service<S>(upstream: Uri, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(inner);
        Self { upstream, service }
    }

    fn endpoint(&self, path_and_query: &str) -> RegistryResult<Uri> {
        let mut parts = self.upstream.clone().into_parts();
        parts.path_and_query = Some(
            path_and_query
                .parse::<PathAndQuery>()
                .map_err(|err| Error::Upstream(format!("bad endpoint {path_and_query}: {err}")))?,
        );
        Uri::from_parts(parts).map_err(|err| Error::Upstream(format!("bad upstream uri: {err}")))
    }

    fn page_query(page: &Pagination) -> String {
        match &page.last {
            Some(last) => format!(
                "?n={}&last={}",
                page.n,
                utf8_percent_encode(last, NON_ALPHANUMERIC)
            ),
            None => format!("?n={}", page.n),
        }
    }

    async fn call(
        &self,
        request: http::Request<hyperdriver::Body>,
    ) -> RegistryResult<http::Response<hyperdriver::Body>> {
        let uri = request.uri().clone();
        self.service
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| Error::Upstream(format!("{uri}: {err}")))
    }

    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: hyperdriver::Body,
        content_type: Option<&str>,
        accept: Option<&str>,
    ) -> RegistryResult<http::Response<hyperdriver::Body>> {
        let uri = self.endpoint(path_and_query)?;
        let mut builder = http::Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        let request = builder
            .body(body)
            .map_err(|err| Error::Upstream(format!("request assembly: {err}")))?;
        self.call(request).await
    }

    async fn collect(response: http::Response<hyperdriver::Body>) -> RegistryResult<Bytes> {
        Ok(response
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Upstream(format!("upstream body: {err}")))?
            .to_bytes())
    }

    fn unexpected(context: &str, status: StatusCode) -> Error {
        Error::Upstream(format!("{context}: unexpected upstream status {status}"))
    }

    /// Extract the upload session snapshot advertised by an upload response.
    fn upload_from_response(
        uuid: &str,
        response: &http::Response<hyperdriver::Body>,
    ) -> RegistryResult<Upload> {
        let uuid = response
            .headers()
            .get(headers::UPLOAD_UUID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(uuid);
        let offset = match response
            .headers()
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
        {
            // `0-0` covers both the empty session and a single byte; treat
            // it as empty, matching a fresh session's announcement.
            None | Some("0-0") => 0,
            Some(range) => {
                let end: u64 = range
                    .rsplit('-')
                    .next()
                    .and_then(|end| end.parse().ok())
                    .ok_or_else(|| {
                        Error::Upstream(format!("unparseable upload range {range:?}"))
                    })?;
                end + 1
            }
        };
        Ok(Upload::new(uuid, offset, UploadState::Active))
    }

    /// Pull the session path out of a `Location` header, tolerating both
    /// absolute and relative forms.
    fn location_path(response: &http::Response<hyperdriver::Body>) -> RegistryResult<String> {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Upstream("upload response without Location".to_string()))?;
        let uri: Uri = location
            .parse()
            .map_err(|err| Error::Upstream(format!("bad Location {location:?}: {err}")))?;
        Ok(uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| location.to_string()))
    }
}

#[async_trait::async_trait]
impl Docker for ProxyDocker {
    #[tracing::instrument(skip(self))]
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        let path = format!("/v2/_catalog{}", Self::page_query(page));
        let response = self
            .send(Method::GET, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body = Self::collect(response).await?;
                let parsed: CatalogPage = serde_json::from_slice(&body)
                    .map_err(|err| Error::Upstream(format!("catalog body: {err}")))?;
                parsed
                    .repositories
                    .iter()
                    .map(|name| name.parse())
                    .collect()
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(Self::unexpected("catalog", status)),
        }
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        let path = format!("/v2/{repo}/blobs/{digest}");
        let response = self
            .send(Method::HEAD, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Self::unexpected("blob head", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let path = format!("/v2/{repo}/blobs/{digest}");
        let response = self
            .send(Method::GET, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::OK => {
                let data = Self::collect(response).await?;
                let actual = Digest::of_bytes(&data);
                if actual != *digest {
                    return Err(Error::Upstream(format!(
                        "blob {digest} hashed to {actual} on arrival"
                    )));
                }
                Ok(Some(Blob::new(digest.clone(), data)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Self::unexpected("blob get", status)),
        }
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        let digest = match asserted {
            Some(digest) => digest.clone(),
            None => Digest::of_bytes(&data),
        };

        let start = self
            .send(
                Method::POST,
                &format!("/v2/{repo}/blobs/uploads/"),
                hyperdriver::Body::empty(),
                None,
                None,
            )
            .await?;
        if start.status() != StatusCode::ACCEPTED {
            return Err(Self::unexpected("upload start", start.status()));
        }
        let session = Self::location_path(&start)?;

        let separator = if session.contains('?') { '&' } else { '?' };
        let finish = self
            .send(
                Method::PUT,
                &format!("{session}{separator}digest={digest}"),
                hyperdriver::Body::from(data.clone()),
                Some("application/octet-stream"),
                None,
            )
            .await?;
        match finish.status() {
            StatusCode::CREATED => Ok(Blob::new(digest, data)),
            status => Err(Self::unexpected("upload finish", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        let path = format!("/v2/{repo}/blobs/uploads/?mount={digest}&from={from}");
        let response = self
            .send(Method::POST, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::CREATED => Ok(Some(digest.clone())),
            // The upstream opened a regular session instead of mounting;
            // close it again and report the blob as unavailable.
            StatusCode::ACCEPTED => {
                let session = Self::location_path(&response)?;
                let cancel = self
                    .send(
                        Method::DELETE,
                        &session,
                        hyperdriver::Body::empty(),
                        None,
                        None,
                    )
                    .await?;
                if !cancel.status().is_success() {
                    tracing::warn!(status = %cancel.status(), "failed to close fallback upload");
                }
                Ok(None)
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Self::unexpected("blob mount", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        let path = format!("/v2/{repo}/manifests/{reference}");
        let response = self
            .send(
                Method::GET,
                &path,
                hyperdriver::Body::empty(),
                None,
                Some(MANIFEST_ACCEPT),
            )
            .await?;
        match response.status() {
            StatusCode::OK => {
                let data = Self::collect(response).await?;
                let digest = Digest::of_bytes(&data);
                if let Reference::Digest(expected) = reference {
                    if digest != *expected {
                        return Err(Error::Upstream(format!(
                            "manifest {expected} hashed to {digest} on arrival"
                        )));
                    }
                }
                Ok(Some(Manifest::new(digest, data)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Self::unexpected("manifest get", status)),
        }
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        let digest = Digest::of_bytes(&data);
        if let Reference::Digest(expected) = reference {
            if *expected != digest {
                return Err(Error::DigestMismatch {
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        let manifest = Manifest::new(digest.clone(), data.clone());
        let content_type = manifest.media_type();
        let path = format!("/v2/{repo}/manifests/{reference}");
        let response = self
            .send(
                Method::PUT,
                &path,
                hyperdriver::Body::from(data),
                Some(&content_type),
                None,
            )
            .await?;
        match response.status() {
            StatusCode::CREATED => Ok(digest),
            status => Err(Self::unexpected("manifest put", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        let path = format!("/v2/{repo}/tags/list{}", Self::page_query(page));
        let response = self
            .send(Method::GET, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body = Self::collect(response).await?;
                let parsed: TagsPage = serde_json::from_slice(&body)
                    .map_err(|err| Error::Upstream(format!("tags body: {err}")))?;
                Ok(parsed.tags.unwrap_or_default())
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(Self::unexpected("tags", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload> {
        let response = self
            .send(
                Method::POST,
                &format!("/v2/{repo}/blobs/uploads/"),
                hyperdriver::Body::empty(),
                None,
                None,
            )
            .await?;
        match response.status() {
            StatusCode::ACCEPTED => Self::upload_from_response("", &response),
            status => Err(Self::unexpected("upload start", status)),
        }
    }

    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload> {
        let path = format!("/v2/{repo}/blobs/uploads/{uuid}");
        let response = self
            .send(Method::GET, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Self::upload_from_response(uuid, &response),
            StatusCode::NOT_FOUND => Err(Error::UploadUnknown(uuid.to_string())),
            status => Err(Self::unexpected("upload status", status)),
        }
    }

    #[tracing::instrument(skip(self, chunk), fields(chunk = chunk.len()))]
    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload> {
        let path = format!("/v2/{repo}/blobs/uploads/{uuid}");
        let response = self
            .send(
                Method::PATCH,
                &path,
                hyperdriver::Body::from(chunk),
                Some("application/octet-stream"),
                None,
            )
            .await?;
        match response.status() {
            StatusCode::ACCEPTED => Self::upload_from_response(uuid, &response),
            StatusCode::NOT_FOUND => Err(Error::UploadUnknown(uuid.to_string())),
            status => Err(Self::unexpected("upload append", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest> {
        let path = format!("/v2/{repo}/blobs/uploads/{uuid}?digest={expected}");
        let response = self
            .send(Method::PUT, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            StatusCode::CREATED => Ok(expected.clone()),
            StatusCode::NOT_FOUND => Err(Error::UploadUnknown(uuid.to_string())),
            StatusCode::BAD_REQUEST => Err(Error::DigestMismatch {
                expected: expected.to_string(),
                actual: "unknown (reported by upstream)".to_string(),
            }),
            status => Err(Self::unexpected("upload finish", status)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()> {
        let path = format!("/v2/{repo}/blobs/uploads/{uuid}");
        let response = self
            .send(Method::DELETE, &path, hyperdriver::Body::empty(), None, None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::UploadUnknown(uuid.to_string())),
            status => Err(Self::unexpected("upload cancel", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dockyard_storage::MemoryStorage;

    use crate::api::RegistryBuilder;
    use crate::local::LocalDocker;

    /// A proxy whose "upstream" is an in-process registry router.
    fn proxy_over(docker: Arc<dyn Docker>) -> ProxyDocker {
        let router = RegistryBuilder::default().docker(docker).build();
        let inner = tower::service_fn(move |request: http::Request<hyperdriver::Body>| {
            let mut router = router.clone();
            async move {
                use tower::Service as _;
                let (parts, body) = request.into_parts();
                let collected = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
                let request = http::Request::from_parts(parts, axum::body::Body::from(collected));
                let response = router.call(request).await.unwrap();
                let (parts, body) = response.into_parts();
                let collected = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
                Ok::<_, hyperdriver::client::Error>(http::Response::from_parts(
                    parts,
                    hyperdriver::Body::from(collected),
                ))
            }
        });
        ProxyDocker::new_with_inner_service(Uri::from_static("http://upstream.test"), inner)
    }

    fn upstream() -> (Arc<LocalDocker>, ProxyDocker) {
        let docker = Arc::new(LocalDocker::new(
            MemoryStorage::with_buckets(&["test"]).into(),
            "test",
        ));
        let proxy = proxy_over(docker.clone());
        (docker, proxy)
    }

    fn repo(name: &str) -> RepoName {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn blob_round_trip_through_the_wire() {
        let (_, proxy) = upstream();
        let name = repo("library/ubuntu");
        let data = Bytes::from_static(b"layer data");

        let blob = proxy.layer_put(&name, data.clone(), None).await.unwrap();
        assert!(proxy.layer_exists(&name, blob.digest()).await.unwrap());

        let fetched = proxy
            .layer_get(&name, blob.digest())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.data(), &data);
    }

    #[tokio::test]
    async fn absent_content_maps_to_none() {
        let (_, proxy) = upstream();
        let name = repo("r");
        let digest = Digest::of_bytes(b"never pushed");

        assert!(!proxy.layer_exists(&name, &digest).await.unwrap());
        assert!(proxy.layer_get(&name, &digest).await.unwrap().is_none());
        assert!(proxy
            .manifest_get(&name, &Reference::Tag("latest".to_string()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn manifest_round_trip_and_listings() {
        let (_, proxy) = upstream();
        let name = repo("library/ubuntu");
        let body = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let tag = Reference::Tag("latest".to_string());

        let digest = proxy.manifest_put(&name, &tag, body.clone()).await.unwrap();
        let manifest = proxy.manifest_get(&name, &tag).await.unwrap().unwrap();
        assert_eq!(manifest.digest(), &digest);
        assert_eq!(manifest.data(), &body);

        assert_eq!(
            proxy.tags(&name, &Pagination::default()).await.unwrap(),
            ["latest"]
        );
        assert_eq!(
            proxy.catalog(&Pagination::default()).await.unwrap(),
            vec![name.clone()]
        );
    }

    #[tokio::test]
    async fn chunked_upload_through_the_wire() {
        let (_, proxy) = upstream();
        let name = repo("r");

        let upload = proxy.upload_start(&name).await.unwrap();
        assert_eq!(upload.offset(), 0);

        let upload = proxy
            .upload_append(&name, upload.uuid(), Bytes::from_static(b"chunk one "))
            .await
            .unwrap();
        let upload = proxy
            .upload_append(&name, upload.uuid(), Bytes::from_static(b"chunk two"))
            .await
            .unwrap();
        assert_eq!(upload.offset(), 19);

        let digest = Digest::of_bytes(b"chunk one chunk two");
        let finished = proxy
            .upload_finish(&name, upload.uuid(), &digest)
            .await
            .unwrap();
        assert_eq!(finished, digest);
        assert!(proxy.layer_exists(&name, &digest).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_session_reports_unknown() {
        let (_, proxy) = upstream();
        let name = repo("r");

        let upload = proxy.upload_start(&name).await.unwrap();
        proxy.upload_cancel(&name, upload.uuid()).await.unwrap();

        let err = proxy
            .upload_status(&name, upload.uuid())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UploadUnknown(_)));
    }

    #[tokio::test]
    async fn mount_round_trip() {
        let (docker, proxy) = upstream();
        let source = repo("a");
        let target = repo("b");
        let blob = docker
            .layer_put(&source, Bytes::from_static(b"shared"), None)
            .await
            .unwrap();

        let mounted = proxy
            .layer_mount(&target, blob.digest(), &source)
            .await
            .unwrap();
        assert_eq!(mounted.as_ref(), Some(blob.digest()));

        let missing = Digest::of_bytes(b"missing");
        assert!(proxy
            .layer_mount(&target, &missing, &source)
            .await
            .unwrap()
            .is_none());
    }
}
