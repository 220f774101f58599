//! Read/write split between two registries.

use std::sync::Arc;

use bytes::Bytes;

use crate::digest::Digest;
use crate::docker::{Blob, Docker, Manifest, Upload};
use crate::error::RegistryResult;
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// Routes reads and writes to different registries.
///
/// Reads (blob/manifest fetch, existence checks, listings) go to `read`,
/// typically a [`MultiReadDocker`](crate::multi::MultiReadDocker) spanning
/// local store and cache. Every mutation, including the whole upload
/// lifecycle, goes exclusively to `write` so nothing ever lands in a cache
/// or proxy by accident.
#[derive(Debug, Clone)]
pub struct ReadWriteDocker {
    read: Arc<dyn Docker>,
    write: Arc<dyn Docker>,
}

impl ReadWriteDocker {
    /// Split reads and writes between two registries.
    pub fn new(read: Arc<dyn Docker>, write: Arc<dyn Docker>) -> Self {
        Self { read, write }
    }
}

#[async_trait::async_trait]
impl Docker for ReadWriteDocker {
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        self.read.catalog(page).await
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        self.read.layer_exists(repo, digest).await
    }

    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        self.read.layer_get(repo, digest).await
    }

    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        self.write.layer_put(repo, data, asserted).await
    }

    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        self.write.layer_mount(repo, digest, from).await
    }

    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        self.read.manifest_get(repo, reference).await
    }

    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        self.write.manifest_put(repo, reference, data).await
    }

    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        self.read.tags(repo, page).await
    }

    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload> {
        self.write.upload_start(repo).await
    }

    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload> {
        self.write.upload_status(repo, uuid).await
    }

    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload> {
        self.write.upload_append(repo, uuid, chunk).await
    }

    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest> {
        self.write.upload_finish(repo, uuid, expected).await
    }

    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()> {
        self.write.upload_cancel(repo, uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalDocker;
    use dockyard_storage::MemoryStorage;

    fn local() -> LocalDocker {
        LocalDocker::new(MemoryStorage::with_buckets(&["test"]).into(), "test")
    }

    #[tokio::test]
    async fn writes_land_on_the_write_side_only() {
        let read_side = Arc::new(local());
        let write_side = Arc::new(local());
        let split = ReadWriteDocker::new(read_side.clone(), write_side.clone());

        let name: RepoName = "r".parse().unwrap();
        let blob = split
            .layer_put(&name, Bytes::from_static(b"bytes"), None)
            .await
            .unwrap();

        assert!(write_side.layer_exists(&name, blob.digest()).await.unwrap());
        assert!(!read_side.layer_exists(&name, blob.digest()).await.unwrap());

        // Reads consult the read side, which never saw the write.
        assert!(!split.layer_exists(&name, blob.digest()).await.unwrap());
    }

    #[tokio::test]
    async fn reads_come_from_the_read_side() {
        let read_side = Arc::new(local());
        let write_side = Arc::new(local());
        let split = ReadWriteDocker::new(read_side.clone(), write_side);

        let name: RepoName = "r".parse().unwrap();
        let tag = Reference::Tag("latest".to_string());
        read_side
            .manifest_put(&name, &tag, Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert!(split.manifest_get(&name, &tag).await.unwrap().is_some());
        assert_eq!(split.tags(&name, &Pagination::default()).await.unwrap(), ["latest"]);
    }
}
