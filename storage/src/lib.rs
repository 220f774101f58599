//! # Storage collaborator
//!
//! The key/value storage boundary consumed by the registry: an object-safe
//! [`Driver`] trait, a cloneable [`Storage`] handle, and the two shipped
//! drivers ([`MemoryStorage`] and [`LocalDriver`]).
//!
//! Drivers must serialize concurrent writes to the same `(bucket, path)` key;
//! callers rely on that single-writer-observable contract and take no locks
//! of their own.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tokio::io;

pub(crate) mod driver;
pub(crate) mod error;
pub(crate) mod local;
pub(crate) mod memory;

#[doc(inline)]
pub use driver::{Driver, Metadata, Reader, Writer};
#[doc(inline)]
pub use error::{StorageError, StorageErrorKind};
#[doc(inline)]
pub use local::LocalDriver;
#[doc(inline)]
pub use memory::MemoryStorage;

/// Declarative storage selection, deserialized from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// In-memory storage; contents are lost on restart.
    Memory {
        /// The bucket to create at startup.
        bucket: String,
    },

    /// File-system storage rooted at the given directory.
    Local {
        /// The root directory for all buckets.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Build a [`Storage`] handle from this configuration.
    pub fn build(self) -> Storage {
        match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
        }
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver in a shared handle.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Get the metadata for a key.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn metadata(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, remote).await
    }

    /// Whether a key exists.
    pub async fn exists(&self, bucket: &str, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.driver.metadata(bucket, remote).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Fetch a value into a writer stream.
    #[tracing::instrument(skip(self, writer), fields(driver = self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "downloading from {bucket}/{remote}");
        self.driver.download(bucket, remote, writer).await
    }

    /// Store a value, using a reader stream to provide the contents.
    #[tracing::instrument(skip(self, reader), fields(driver = self.driver.name()))]
    pub async fn upload<'d, R>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "uploading to {bucket}/{remote}");
        self.driver.upload(bucket, remote, reader).await
    }

    /// List the keys in a bucket, optionally filtered by a prefix.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    /// Delete a key. Deleting a missing key is not an error.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, path).await
    }
}
