use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::{io_error, StorageError};

#[derive(Debug)]
struct MemoryItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryItem> for Metadata {
    fn from(value: &MemoryItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that keeps all values in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, HashMap<Utf8PathBuf, MemoryItem>>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?;
        bucket_map
            .get(remote)
            .map(Metadata::from)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(reader, &mut buf)
            .await
            .map_err(|err| io_error(self.name(), err))?;
        buf.shutdown()
            .await
            .map_err(|err| io_error(self.name(), err))?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?;
        let mut data = bucket_map
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?
            .data
            .as_slice();

        tokio::io::copy(&mut data, writer)
            .await
            .map_err(|err| io_error(self.name(), err))?;
        writer
            .flush()
            .await
            .map_err(|err| io_error(self.name(), err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(bucket_map) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut paths = Vec::new();
        for path in bucket_map.keys() {
            match prefix {
                Some(prefix) if !path.starts_with(prefix) => {}
                _ => paths.push(path.to_string()),
            }
        }

        Ok(paths)
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket_map) = buckets.get_mut(bucket) {
            bucket_map.remove(remote);
        }
        Ok(())
    }
}
