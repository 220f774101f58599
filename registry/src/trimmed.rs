//! Repository-name trimming for path-prefixed mounting.

use std::sync::Arc;

use bytes::Bytes;

use crate::digest::Digest;
use crate::docker::{Blob, Docker, Manifest, Upload};
use crate::error::{Error, RegistryResult};
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// Mounts a single-tenant registry under a repository-name prefix.
///
/// Incoming names must start with `prefix + "/"`; the prefix is stripped
/// before delegating and re-added to names returned by the catalog. A name
/// outside the prefix is rejected as `NAME_INVALID` rather than silently
/// routed.
#[derive(Debug, Clone)]
pub struct TrimmedDocker {
    origin: Arc<dyn Docker>,
    prefix: RepoName,
}

impl TrimmedDocker {
    /// Mount `origin` under `prefix`.
    pub fn new(origin: Arc<dyn Docker>, prefix: RepoName) -> Self {
        Self { origin, prefix }
    }

    fn trim(&self, repo: &RepoName) -> RegistryResult<RepoName> {
        let name = repo.as_str();
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::NameInvalid(format!("{name} is not under {}", self.prefix)))
            .and_then(|inner| inner.parse())
    }

    fn prefixed(&self, inner: &RepoName) -> RegistryResult<RepoName> {
        format!("{}/{inner}", self.prefix).parse()
    }

    /// Translate an outer catalog cursor into the origin's name space.
    ///
    /// Returns `None` when no prefixed name can follow the cursor at all.
    fn trim_cursor(&self, page: &Pagination) -> Option<Pagination> {
        let last = match &page.last {
            None => None,
            Some(last) => {
                let prefixed = format!("{}/", self.prefix);
                if let Some(inner) = last.strip_prefix(&prefixed) {
                    Some(inner.to_string())
                } else if last.as_str() < prefixed.as_str() {
                    // Every prefixed name still sorts after the cursor.
                    None
                } else {
                    // The cursor already sorts past the whole prefix subtree.
                    return None;
                }
            }
        };
        Some(Pagination::new(last, page.n))
    }
}

#[async_trait::async_trait]
impl Docker for TrimmedDocker {
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        let Some(inner_page) = self.trim_cursor(page) else {
            return Ok(Vec::new());
        };
        self.origin
            .catalog(&inner_page)
            .await?
            .iter()
            .map(|inner| self.prefixed(inner))
            .collect()
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        self.origin.layer_exists(&self.trim(repo)?, digest).await
    }

    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        self.origin.layer_get(&self.trim(repo)?, digest).await
    }

    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        self.origin
            .layer_put(&self.trim(repo)?, data, asserted)
            .await
    }

    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        self.origin
            .layer_mount(&self.trim(repo)?, digest, &self.trim(from)?)
            .await
    }

    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        self.origin.manifest_get(&self.trim(repo)?, reference).await
    }

    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        self.origin
            .manifest_put(&self.trim(repo)?, reference, data)
            .await
    }

    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        self.origin.tags(&self.trim(repo)?, page).await
    }

    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload> {
        self.origin.upload_start(&self.trim(repo)?).await
    }

    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload> {
        self.origin.upload_status(&self.trim(repo)?, uuid).await
    }

    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload> {
        self.origin
            .upload_append(&self.trim(repo)?, uuid, chunk)
            .await
    }

    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest> {
        self.origin
            .upload_finish(&self.trim(repo)?, uuid, expected)
            .await
    }

    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()> {
        self.origin.upload_cancel(&self.trim(repo)?, uuid).await
    }
}
