//! Protocol header names used on both sides of the wire.

use http::HeaderName;

/// `Docker-Distribution-API-Version`, set on every response.
pub const API_VERSION: HeaderName = HeaderName::from_static("docker-distribution-api-version");

/// The version value advertised by this implementation.
pub const API_VERSION_VALUE: &str = "registry/2.0";

/// `Docker-Content-Digest`, the canonical digest of returned content.
pub const CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// `Docker-Upload-UUID`, the session id of an upload in progress.
pub const UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
