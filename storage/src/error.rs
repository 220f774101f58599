//! Error types shared by all storage drivers.

use std::fmt;

/// Categorizes storage errors by their semantic meaning, independent of
/// the underlying storage backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested resource (key or bucket) was not found.
    NotFound,

    /// The caller lacks permission to perform the requested operation.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    Io,

    /// The request was invalid (bad parameters, malformed data, etc.).
    InvalidRequest,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// Storage error carrying the driver name, the semantic kind, and the key
/// context the operation was addressing when it failed.
#[derive(Debug, thiserror::Error)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl StorageError {
    /// Create a new storage error from an underlying error.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            bucket: None,
            path: None,
            source: source.into(),
        }
    }

    /// A `NotFound` error for the given bucket and path.
    pub fn not_found(engine: &'static str, bucket: &str, path: &str) -> Self {
        Self::new(
            engine,
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such key: {bucket}/{path}"),
            ),
        )
        .with_bucket(bucket)
        .with_path(path)
    }

    /// Attach the bucket the operation was addressing.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Attach the key path the operation was addressing.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The semantic category of this error.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// The name of the driver that produced this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Whether this error indicates a missing key or bucket.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.engine, self.kind)?;
        match (&self.bucket, &self.path) {
            (Some(bucket), Some(path)) => write!(f, " ({bucket}/{path})"),
            (Some(bucket), None) => write!(f, " ({bucket})"),
            (None, Some(path)) => write!(f, " ({path})"),
            (None, None) => Ok(()),
        }
    }
}

/// Map an `std::io::Error` onto a storage error, keeping the kind.
pub(crate) fn io_error(engine: &'static str, err: std::io::Error) -> StorageError {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
        _ => StorageErrorKind::Io,
    };
    StorageError::new(engine, kind, err)
}
