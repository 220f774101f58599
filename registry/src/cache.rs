//! Pull-through caching in front of a remote registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

use crate::digest::Digest;
use crate::docker::{Blob, Docker, Manifest, Upload};
use crate::error::RegistryResult;
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// Which repositories a cache layer is willing to populate.
#[derive(Debug, Clone)]
pub enum CacheScope {
    /// Cache every repository.
    All,
    /// Cache a repository subtree only.
    Prefix(RepoName),
}

impl CacheScope {
    fn matches(&self, repo: &RepoName) -> bool {
        match self {
            CacheScope::All => true,
            CacheScope::Prefix(prefix) => {
                let name = repo.as_str();
                name == prefix.as_str()
                    || name
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Serves reads from a cache registry, populating it from a remote on miss.
///
/// Content addressed by digest (blobs, manifest revisions) is immutable, so a
/// cache hit is always authoritative. Tag lookups are mutable pointers and
/// are revalidated against the remote once their cache entry is older than
/// `ttl`; when the remote is unreachable a stale entry is served instead of
/// the outage. Listings and mutations pass through to the remote, with the
/// cache listing as a fallback for listings during an outage.
#[derive(Debug, Clone)]
pub struct CacheDocker {
    remote: Arc<dyn Docker>,
    cache: Arc<dyn Docker>,
    ttl: Duration,
    scope: CacheScope,
    stamps: Arc<DashMap<String, Instant>>,
}

impl CacheDocker {
    /// Wrap `remote` with `cache`, revalidating tags after `ttl`.
    pub fn new(
        remote: Arc<dyn Docker>,
        cache: Arc<dyn Docker>,
        ttl: Duration,
        scope: CacheScope,
    ) -> Self {
        Self {
            remote,
            cache,
            ttl,
            scope,
            stamps: Arc::new(DashMap::new()),
        }
    }

    fn tag_key(repo: &RepoName, tag: &str) -> String {
        format!("{repo}:{tag}")
    }

    fn tag_fresh(&self, key: &str) -> bool {
        self.stamps
            .get(key)
            .is_some_and(|stamp| stamp.elapsed() < self.ttl)
    }

    async fn store_blob(&self, repo: &RepoName, blob: &Blob) {
        if !self.scope.matches(repo) {
            return;
        }
        if let Err(err) = self
            .cache
            .layer_put(repo, blob.data().clone(), Some(blob.digest()))
            .await
        {
            tracing::warn!(%repo, digest = %blob.digest(), %err, "blob cache store failed");
        }
    }

    async fn store_manifest(&self, repo: &RepoName, reference: &Reference, manifest: &Manifest) {
        if !self.scope.matches(repo) {
            return;
        }
        if let Err(err) = self
            .cache
            .manifest_put(repo, reference, manifest.data().clone())
            .await
        {
            tracing::warn!(%repo, %reference, %err, "manifest cache store failed");
            return;
        }
        if let Reference::Tag(tag) = reference {
            self.stamps
                .insert(Self::tag_key(repo, tag), Instant::now());
        }
    }

    async fn tag_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
        tag: &str,
    ) -> RegistryResult<Option<Manifest>> {
        let key = Self::tag_key(repo, tag);
        if self.tag_fresh(&key) {
            if let Some(cached) = self.cache.manifest_get(repo, reference).await? {
                return Ok(Some(cached));
            }
        }

        match self.remote.manifest_get(repo, reference).await {
            Ok(Some(manifest)) => {
                self.store_manifest(repo, reference, &manifest).await;
                Ok(Some(manifest))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                // Outage: a previously-seen tag keeps resolving.
                if let Some(stale) = self.cache.manifest_get(repo, reference).await? {
                    tracing::warn!(%repo, tag, %err, "remote unreachable, serving stale tag");
                    return Ok(Some(stale));
                }
                Err(err)
            }
        }
    }
}

#[async_trait::async_trait]
impl Docker for CacheDocker {
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        match self.remote.catalog(page).await {
            Ok(names) => Ok(names),
            Err(err) => {
                tracing::warn!(%err, "remote unreachable, serving cached catalog");
                self.cache.catalog(page).await
            }
        }
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        if self.cache.layer_exists(repo, digest).await? {
            return Ok(true);
        }
        self.remote.layer_exists(repo, digest).await
    }

    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        if let Some(cached) = self.cache.layer_get(repo, digest).await? {
            return Ok(Some(cached));
        }
        let Some(blob) = self.remote.layer_get(repo, digest).await? else {
            return Ok(None);
        };
        self.store_blob(repo, &blob).await;
        Ok(Some(blob))
    }

    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        self.remote.layer_put(repo, data, asserted).await
    }

    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        self.remote.layer_mount(repo, digest, from).await
    }

    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        match reference {
            Reference::Tag(tag) => self.tag_get(repo, reference, tag).await,
            Reference::Digest(_) => {
                // Digest-addressed content is immutable.
                if let Some(cached) = self.cache.manifest_get(repo, reference).await? {
                    return Ok(Some(cached));
                }
                let Some(manifest) = self.remote.manifest_get(repo, reference).await? else {
                    return Ok(None);
                };
                self.store_manifest(repo, reference, &manifest).await;
                Ok(Some(manifest))
            }
        }
    }

    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        let digest = self.remote.manifest_put(repo, reference, data).await?;
        if let Reference::Tag(tag) = reference {
            // The cached pointer is no longer trustworthy.
            self.stamps.remove(&Self::tag_key(repo, tag));
        }
        Ok(digest)
    }

    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        match self.remote.tags(repo, page).await {
            Ok(tags) => Ok(tags),
            Err(err) => {
                tracing::warn!(%repo, %err, "remote unreachable, serving cached tags");
                self.cache.tags(repo, page).await
            }
        }
    }

    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload> {
        self.remote.upload_start(repo).await
    }

    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload> {
        self.remote.upload_status(repo, uuid).await
    }

    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload> {
        self.remote.upload_append(repo, uuid, chunk).await
    }

    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest> {
        self.remote.upload_finish(repo, uuid, expected).await
    }

    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()> {
        self.remote.upload_cancel(repo, uuid).await
    }
}
