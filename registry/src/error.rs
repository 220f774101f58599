//! Error taxonomy and the OCI error envelope.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, Error>;

/// Error type for registry operations.
///
/// Every variant that belongs to the registry protocol knows its HTTP status
/// and OCI error code and renders as the standard error envelope. Storage and
/// upstream faults are collaborator failures outside the protocol contract;
/// they surface as opaque 5xx responses instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed repository name.
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// Malformed tag.
    #[error("invalid tag: {0}")]
    TagInvalid(String),

    /// Malformed digest string.
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// Submitted content does not hash to the digest the client asserted.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the client asserted.
        expected: String,
        /// The digest of the bytes actually received.
        actual: String,
    },

    /// Blob not known to the addressed repository.
    #[error("blob unknown: {0}")]
    BlobUnknown(String),

    /// Manifest not known under the given reference.
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Upload session unknown, completed or cancelled.
    #[error("blob upload unknown: {0}")]
    UploadUnknown(String),

    /// Syntactically invalid request: a query string or body the server
    /// cannot read.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The method is not supported for the addressed entity.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The path does not match the v2 grammar.
    #[error("unknown route: {0}")]
    RouteUnknown(String),

    /// Missing or invalid credentials.
    #[error("authentication required: {0}")]
    Unauthorized(String),

    /// Valid credentials with insufficient permission.
    #[error("access denied: {0}")]
    Denied(String),

    /// The upstream registry could not be reached or answered garbage.
    #[error("upstream registry failure: {0}")]
    Upstream(String),

    /// Storage collaborator failure.
    #[error("storage failure: {0}")]
    Storage(#[from] dockyard_storage::StorageError),
}

impl Error {
    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NameInvalid(_)
            | Error::TagInvalid(_)
            | Error::DigestInvalid(_)
            | Error::DigestMismatch { .. }
            | Error::Malformed(_) => StatusCode::BAD_REQUEST,
            Error::BlobUnknown(_)
            | Error::ManifestUnknown(_)
            | Error::UploadUnknown(_)
            | Error::RouteUnknown(_) => StatusCode::NOT_FOUND,
            Error::Unsupported(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Denied(_) => StatusCode::FORBIDDEN,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The OCI error code, or `None` for collaborator faults that must not
    /// be dressed up in the protocol envelope.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Error::NameInvalid(_) => Some("NAME_INVALID"),
            Error::TagInvalid(_) => Some("TAG_INVALID"),
            Error::DigestInvalid(_) | Error::DigestMismatch { .. } => Some("DIGEST_INVALID"),
            Error::BlobUnknown(_) => Some("BLOB_UNKNOWN"),
            Error::ManifestUnknown(_) => Some("MANIFEST_UNKNOWN"),
            Error::UploadUnknown(_) => Some("BLOB_UPLOAD_UNKNOWN"),
            // The protocol table has no dedicated bad-syntax code; the
            // catch-all code with a 400 status is the closest fit.
            Error::Malformed(_) | Error::Unsupported(_) | Error::RouteUnknown(_) => {
                Some("UNSUPPORTED")
            }
            Error::Unauthorized(_) => Some("UNAUTHORIZED"),
            Error::Denied(_) => Some("DENIED"),
            Error::Upstream(_) | Error::Storage(_) => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Error::DigestMismatch { actual, .. } => Some(actual.clone()),
            _ => None,
        }
    }
}

/// OCI error envelope.
#[derive(Debug, serde::Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let Some(code) = self.error_code() else {
            // Collaborator fault: opaque failure, no envelope.
            tracing::error!(error = %self, "collaborator failure");
            return (status, self.to_string()).into_response();
        };

        let body = ErrorEnvelope {
            errors: vec![ErrorDetail {
                code,
                message: self.to_string(),
                detail: self.detail(),
            }],
        };

        (
            status,
            [(
                header::CONTENT_TYPE,
                "application/json; charset=utf-8",
            )],
            serde_json::to_string(&body).unwrap_or_default(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_mapping() {
        let err = Error::BlobUnknown("sha256:aa".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), Some("BLOB_UNKNOWN"));

        let err = Error::DigestMismatch {
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), Some("DIGEST_INVALID"));

        let err = Error::Malformed("query string: bad n".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), Some("UNSUPPORTED"));
    }

    #[test]
    fn collaborator_faults_have_no_envelope_code() {
        let err = Error::Upstream("connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.error_code().is_none());
    }
}
