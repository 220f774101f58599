//! Read fan-out over several registries.

use std::sync::Arc;

use bytes::Bytes;

use crate::digest::Digest;
use crate::docker::{Blob, Docker, Manifest, Upload};
use crate::error::{Error, RegistryResult};
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// Presents several registries as one readable registry.
///
/// Read operations try the delegates in declared order and return the first
/// present result, so earlier delegates take precedence when two hold
/// different content under the same reference. Absent only when every
/// delegate reports absent. Delegate failures propagate rather than being
/// skipped. Mutations are rejected with `UNSUPPORTED`.
#[derive(Debug, Clone)]
pub struct MultiReadDocker {
    delegates: Vec<Arc<dyn Docker>>,
}

impl MultiReadDocker {
    /// Combine delegates, earlier entries taking precedence.
    pub fn new(delegates: Vec<Arc<dyn Docker>>) -> Self {
        Self { delegates }
    }

    fn read_only<T>(&self, operation: &str) -> RegistryResult<T> {
        Err(Error::Unsupported(format!(
            "{operation} on a read-only registry"
        )))
    }
}

#[async_trait::async_trait]
impl Docker for MultiReadDocker {
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        let mut merged = Vec::new();
        for delegate in &self.delegates {
            merged.extend(
                delegate
                    .catalog(page)
                    .await?
                    .into_iter()
                    .map(|name| name.to_string()),
            );
        }
        page.window(merged)
            .into_iter()
            .map(|name| name.parse())
            .collect()
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        for delegate in &self.delegates {
            if delegate.layer_exists(repo, digest).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        for delegate in &self.delegates {
            if let Some(blob) = delegate.layer_get(repo, digest).await? {
                return Ok(Some(blob));
            }
        }
        Ok(None)
    }

    async fn layer_put(
        &self,
        _repo: &RepoName,
        _data: Bytes,
        _asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        self.read_only("blob put")
    }

    async fn layer_mount(
        &self,
        _repo: &RepoName,
        _digest: &Digest,
        _from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        self.read_only("blob mount")
    }

    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        for delegate in &self.delegates {
            if let Some(manifest) = delegate.manifest_get(repo, reference).await? {
                return Ok(Some(manifest));
            }
        }
        Ok(None)
    }

    async fn manifest_put(
        &self,
        _repo: &RepoName,
        _reference: &Reference,
        _data: Bytes,
    ) -> RegistryResult<Digest> {
        self.read_only("manifest put")
    }

    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        let mut merged = Vec::new();
        for delegate in &self.delegates {
            merged.extend(delegate.tags(repo, page).await?);
        }
        Ok(page.window(merged))
    }

    async fn upload_start(&self, _repo: &RepoName) -> RegistryResult<Upload> {
        self.read_only("upload start")
    }

    async fn upload_status(&self, _repo: &RepoName, _uuid: &str) -> RegistryResult<Upload> {
        self.read_only("upload status")
    }

    async fn upload_append(
        &self,
        _repo: &RepoName,
        _uuid: &str,
        _chunk: Bytes,
    ) -> RegistryResult<Upload> {
        self.read_only("upload append")
    }

    async fn upload_finish(
        &self,
        _repo: &RepoName,
        _uuid: &str,
        _expected: &Digest,
    ) -> RegistryResult<Digest> {
        self.read_only("upload finish")
    }

    async fn upload_cancel(&self, _repo: &RepoName, _uuid: &str) -> RegistryResult<()> {
        self.read_only("upload cancel")
    }
}
