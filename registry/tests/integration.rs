//! Integration tests for the registry HTTP surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use dockyard::api::RegistryBuilder;
use dockyard::auth::{Action, BasicAuthenticator, UserPermissions};
use dockyard_storage::MemoryStorage;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

fn test_registry() -> axum::Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::default()
        .storage(storage.into())
        .bucket("test-registry")
        .build()
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'r>(response: &'r axum::response::Response, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

async fn push_blob(app: &axum::Router, repo: &str, data: &'static [u8]) -> String {
    let digest = digest_of(data);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v2/{repo}/blobs/uploads/"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_str(&response, "location").to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={digest}"))
                .body(Body::from(Bytes::from_static(data)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

#[tokio::test]
async fn api_version_check() {
    let app = test_registry();

    let response = app
        .oneshot(Request::builder().uri("/v2/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
}

#[tokio::test]
async fn blob_upload_and_download() {
    let app = test_registry();
    let data = b"Hello, OCI Registry!";
    let digest = push_blob(&app, "test-repo", data).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/test-repo/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(
        header_str(&response, "content-length"),
        data.len().to_string()
    );
    assert_eq!(&body_bytes(response).await[..], data);
}

#[tokio::test]
async fn blob_head_carries_metadata_without_body() {
    let app = test_registry();
    let data = b"head me";
    let digest = push_blob(&app, "r", data).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri(format!("/v2/r/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(
        header_str(&response, "content-length"),
        data.len().to_string()
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn unknown_blob_is_404_with_envelope() {
    let app = test_registry();
    let digest = digest_of(b"never pushed");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v2/r/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "BLOB_UNKNOWN");
}

#[tokio::test]
async fn malformed_digest_is_400() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/r/blobs/sha256:nothex")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");
}

#[tokio::test]
async fn chunked_upload_tracks_the_range() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/library/ubuntu/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-0");
    let uuid = header_str(&response, "docker-upload-uuid").to_string();
    let location = header_str(&response, "location").to_string();
    assert!(location.ends_with(&uuid));

    // First chunk of 64 bytes.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from(vec![b'a'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-63");

    // Second chunk brings the session to 128 bytes.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from(vec![b'b'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-127");

    // Status peek reports the same range.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "range"), "0-127");
    assert_eq!(header_str(&response, "docker-upload-uuid"), uuid);

    let mut content = vec![b'a'; 64];
    content.extend_from_slice(&[b'b'; 64]);
    let digest = digest_of(&content);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/library/ubuntu/blobs/{digest}")
    );

    // A finished session no longer answers.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "BLOB_UPLOAD_UNKNOWN");
}

#[tokio::test]
async fn finish_with_wrong_digest_is_rejected_without_a_blob() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/r/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = header_str(&response, "location").to_string();

    let wrong = digest_of(b"different content");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("{location}?digest={wrong}"))
                .body(Body::from(Bytes::from_static(b"actual content")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");
    assert_eq!(body["errors"][0]["detail"], digest_of(b"actual content"));

    // No blob materialized under either digest.
    for digest in [wrong, digest_of(b"actual content")] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri(format!("/v2/r/blobs/{digest}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn monolithic_upload_in_one_post() {
    let app = test_registry();
    let data = b"single shot";
    let digest = digest_of(data);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v2/r/blobs/uploads/?digest={digest}"))
                .body(Body::from(Bytes::from_static(data)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);

    let response = app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri(format!("/v2/r/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cancelled_upload_cannot_be_cancelled_again() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/r/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = header_str(&response, "location").to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "BLOB_UPLOAD_UNKNOWN");
}

#[tokio::test]
async fn cancel_identifies_the_session() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/r/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = header_str(&response, "location").to_string();
    let uuid = header_str(&response, "docker-upload-uuid").to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(&location)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-upload-uuid"), uuid);
}

#[tokio::test]
async fn session_id_with_path_segments_is_unknown() {
    let app = test_registry();

    for uri in [
        "/v2/r/blobs/uploads/../x",
        "/v2/r/blobs/uploads/../../_manifests/tags",
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "BLOB_UPLOAD_UNKNOWN");
    }
}

#[tokio::test]
async fn bad_listing_query_is_400() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/_catalog?n=zebra")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "UNSUPPORTED");
}

#[tokio::test]
async fn cross_repository_mount() {
    let app = test_registry();
    let digest = push_blob(&app, "source", b"shared layer").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/v2/target/blobs/uploads/?mount={digest}&from=source"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/target/blobs/{digest}")
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri(format!("/v2/target/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mount_of_unknown_blob_opens_a_session() {
    let app = test_registry();
    let digest = digest_of(b"never pushed anywhere");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/v2/target/blobs/uploads/?mount={digest}&from=source"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().contains_key("docker-upload-uuid"));
}

#[tokio::test]
async fn manifest_push_and_pull_by_tag_and_digest() {
    let app = test_registry();
    let manifest = br#"{"schemaVersion":2,"config":{}}"#;
    let digest = digest_of(manifest);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/library/ubuntu/manifests/latest")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(Bytes::from_static(manifest)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/library/ubuntu/manifests/{digest}")
    );

    for reference in ["latest".to_string(), digest.clone()] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v2/library/ubuntu/manifests/{reference}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "docker-content-digest"), digest);
        assert_eq!(
            header_str(&response, "content-type"),
            "application/vnd.docker.distribution.manifest.v2+json"
        );
        assert_eq!(&body_bytes(response).await[..], manifest);
    }
}

#[tokio::test]
async fn manifest_put_with_mismatched_digest_writes_nothing() {
    let app = test_registry();
    let wrong = digest_of(b"some other document");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/v2/r/manifests/{wrong}"))
                .body(Body::from(Bytes::from_static(b"{\"schemaVersion\":2}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v2/r/manifests/{wrong}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn idempotent_manifest_repush() {
    let app = test_registry();
    let manifest = br#"{"schemaVersion":2}"#;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v2/r/manifests/latest")
                    .body(Body::from(Bytes::from_static(manifest)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}

#[tokio::test]
async fn unknown_manifest_is_404() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/r/manifests/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn catalog_and_tags_paginate() {
    let app = test_registry();

    for (repo, tag) in [("alpha", "v1"), ("alpha", "v2"), ("beta", "latest")] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v2/{repo}/manifests/{tag}"))
                    .body(Body::from(Bytes::from_static(b"{}")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/_catalog")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["repositories"], serde_json::json!(["alpha", "beta"]));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/_catalog?n=1&last=alpha")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["repositories"], serde_json::json!(["beta"]));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/alpha/tags/list?n=1&last=v1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["name"], "alpha");
    assert_eq!(body["tags"], serde_json::json!(["v2"]));
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let app = test_registry();
    let digest = digest_of(b"x");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v2/r/blobs/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "UNSUPPORTED");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "UNSUPPORTED");
}

#[tokio::test]
async fn invalid_repository_name_is_400() {
    let app = test_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/Bad_Name/tags/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "NAME_INVALID");
}

fn guarded_registry() -> axum::Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::default()
        .storage(storage.into())
        .bucket("test-registry")
        .authenticator(Arc::new(
            BasicAuthenticator::new().with_user("alice", "s3cret"),
        ))
        .permissions(Arc::new(
            UserPermissions::new()
                .grant("alice", Action::Pull)
                .grant_catalog("alice"),
        ))
        .build()
}

fn basic(credentials: &str) -> String {
    use base64::Engine as _;
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

#[tokio::test]
async fn anonymous_requests_get_401() {
    let app = guarded_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/_catalog")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn authenticated_user_without_push_gets_403() {
    let app = guarded_registry();

    // Pull is granted.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/r/tags/list")
                .header(header::AUTHORIZATION, basic("alice:s3cret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Push is not.
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/r/manifests/latest")
                .header(header::AUTHORIZATION, basic("alice:s3cret"))
                .body(Body::from(Bytes::from_static(b"{}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "DENIED");
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let app = guarded_registry();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/r/tags/list")
                .header(header::AUTHORIZATION, basic("alice:wrong"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
