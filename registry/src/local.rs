//! The storage-backed registry.

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use dockyard_storage::Storage;
use serde::{Deserialize, Serialize};
use tokio::io::BufReader;

use crate::digest::{Digest, DigestSink};
use crate::docker::{Blob, Docker, Manifest, Upload, UploadState};
use crate::error::{Error, RegistryResult};
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

const REPOSITORIES: &str = "repositories";

/// Registry backed by the storage collaborator.
///
/// Layout inside one bucket:
///
/// ```text
/// blobs/<algo>/<hex>                                  content-addressed bytes
/// repositories/<name>/_layers/<algo>/<hex>            per-repo link marker
/// repositories/<name>/_manifests/revisions/<algo>/<hex>
/// repositories/<name>/_manifests/tags/<tag>           tag -> digest pointer
/// repositories/<name>/_uploads/<uuid>/state           session record (JSON)
/// repositories/<name>/_uploads/<uuid>/data            accumulated bytes
/// ```
///
/// Repository name segments cannot start with `_`, so the `_`-prefixed
/// subtrees never collide with nested repository names. Upload sessions live
/// in the store rather than in process memory, so they survive restarts.
#[derive(Debug, Clone)]
pub struct LocalDocker {
    storage: Storage,
    bucket: String,
}

/// Durable upload-session record, keyed by uuid.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    offset: u64,
    state: UploadState,
}

impl LocalDocker {
    /// Create a registry over a storage bucket.
    pub fn new(storage: Storage, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    fn blob_data(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/{}/{}", digest.algorithm(), digest.hex()))
    }

    fn layer_link(repo: &RepoName, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "{REPOSITORIES}/{repo}/_layers/{}/{}",
            digest.algorithm(),
            digest.hex()
        ))
    }

    fn manifest_revision(repo: &RepoName, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!(
            "{REPOSITORIES}/{repo}/_manifests/revisions/{}/{}",
            digest.algorithm(),
            digest.hex()
        ))
    }

    fn tag_pointer(repo: &RepoName, tag: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{REPOSITORIES}/{repo}/_manifests/tags/{tag}"))
    }

    fn upload_state(repo: &RepoName, uuid: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{REPOSITORIES}/{repo}/_uploads/{uuid}/state"))
    }

    fn upload_data(repo: &RepoName, uuid: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{REPOSITORIES}/{repo}/_uploads/{uuid}/data"))
    }

    async fn read(&self, path: &Utf8Path) -> RegistryResult<Option<Vec<u8>>> {
        let mut data = Vec::new();
        match self.storage.download(&self.bucket, path, &mut data).await {
            Ok(()) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, path: &Utf8Path, data: &[u8]) -> RegistryResult<()> {
        let mut reader = BufReader::new(data);
        self.storage
            .upload(&self.bucket, path, &mut reader)
            .await?;
        Ok(())
    }

    async fn key_exists(&self, path: &Utf8Path) -> RegistryResult<bool> {
        Ok(self.storage.exists(&self.bucket, path).await?)
    }

    /// Load the session record for `uuid`, rejecting unknown and terminal
    /// sessions alike with `BLOB_UPLOAD_UNKNOWN`.
    async fn active_session(&self, repo: &RepoName, uuid: &str) -> RegistryResult<SessionRecord> {
        let Some(raw) = self.read(&Self::upload_state(repo, uuid)).await? else {
            return Err(Error::UploadUnknown(uuid.to_string()));
        };
        let record: SessionRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(%repo, uuid, %err, "corrupt upload session record");
                return Err(Error::UploadUnknown(uuid.to_string()));
            }
        };
        if record.state.is_terminal() {
            return Err(Error::UploadUnknown(uuid.to_string()));
        }
        Ok(record)
    }

    async fn save_session(
        &self,
        repo: &RepoName,
        uuid: &str,
        record: &SessionRecord,
    ) -> RegistryResult<()> {
        let raw = serde_json::to_vec(record).map_err(|err| {
            dockyard_storage::StorageError::new(
                "session",
                dockyard_storage::StorageErrorKind::InvalidRequest,
                err,
            )
        })?;
        self.write(&Self::upload_state(repo, uuid), &raw).await
    }

    /// Derive the repository name from a listed key, cutting at the first
    /// `_`-prefixed segment.
    fn repo_of_key(key: &str) -> Option<String> {
        let rest = key.strip_prefix(REPOSITORIES)?.strip_prefix('/')?;
        let mut name_end = 0;
        for segment in rest.split('/') {
            if segment.starts_with('_') {
                return (name_end > 0).then(|| rest[..name_end - 1].to_string());
            }
            name_end += segment.len() + 1;
        }
        None
    }
}

#[async_trait::async_trait]
impl Docker for LocalDocker {
    #[tracing::instrument(skip(self))]
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>> {
        let keys = self
            .storage
            .list(&self.bucket, Some(Utf8Path::new(REPOSITORIES)))
            .await?;

        let names = keys.iter().filter_map(|key| Self::repo_of_key(key));
        page.window(names)
            .into_iter()
            .map(|name| name.parse())
            .collect()
    }

    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool> {
        self.key_exists(&Self::layer_link(repo, digest)).await
    }

    #[tracing::instrument(skip(self))]
    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>> {
        if !self.key_exists(&Self::layer_link(repo, digest)).await? {
            return Ok(None);
        }
        let Some(data) = self.read(&Self::blob_data(digest)).await? else {
            tracing::warn!(%repo, %digest, "layer link without blob data");
            return Ok(None);
        };
        Ok(Some(Blob::new(digest.clone(), data.into())))
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob> {
        // Trusted callers (a verified upload finish) assert the digest and
        // skip recomputation.
        let digest = match asserted {
            Some(digest) => digest.clone(),
            None => Digest::of_bytes(&data),
        };

        self.write(&Self::blob_data(&digest), &data).await?;
        self.write(&Self::layer_link(repo, &digest), digest.to_string().as_bytes())
            .await?;

        Ok(Blob::new(digest, data))
    }

    #[tracing::instrument(skip(self))]
    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>> {
        if !self.key_exists(&Self::layer_link(from, digest)).await? {
            return Ok(None);
        }
        self.write(&Self::layer_link(repo, digest), digest.to_string().as_bytes())
            .await?;
        Ok(Some(digest.clone()))
    }

    #[tracing::instrument(skip(self))]
    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>> {
        let digest = match reference {
            Reference::Digest(digest) => digest.clone(),
            Reference::Tag(tag) => {
                let Some(raw) = self.read(&Self::tag_pointer(repo, tag)).await? else {
                    return Ok(None);
                };
                let text = String::from_utf8_lossy(&raw);
                match text.trim().parse() {
                    Ok(digest) => digest,
                    Err(_) => {
                        tracing::warn!(%repo, tag, "corrupt tag pointer");
                        return Ok(None);
                    }
                }
            }
        };

        let Some(data) = self.read(&Self::manifest_revision(repo, &digest)).await? else {
            return Ok(None);
        };
        Ok(Some(Manifest::new(digest, data.into())))
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        let digest = Digest::of_bytes(&data);

        // Verify before writing anything, so a mismatch leaves no partial
        // state behind.
        if let Reference::Digest(expected) = reference {
            if *expected != digest {
                return Err(Error::DigestMismatch {
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        self.write(&Self::manifest_revision(repo, &digest), &data)
            .await?;

        if let Reference::Tag(tag) = reference {
            self.write(&Self::tag_pointer(repo, tag), digest.to_string().as_bytes())
                .await?;
        }

        Ok(digest)
    }

    #[tracing::instrument(skip(self))]
    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>> {
        let prefix = Utf8PathBuf::from(format!("{REPOSITORIES}/{repo}/_manifests/tags"));
        let keys = self.storage.list(&self.bucket, Some(&prefix)).await?;

        let tags = keys.iter().filter_map(|key| {
            Utf8Path::new(key)
                .strip_prefix(&prefix)
                .ok()
                .map(|tag| tag.to_string())
        });
        Ok(page.window(tags))
    }

    #[tracing::instrument(skip(self))]
    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let record = SessionRecord {
            offset: 0,
            state: UploadState::Active,
        };
        self.save_session(repo, &uuid, &record).await?;
        tracing::debug!(%repo, uuid, "upload session opened");
        Ok(Upload::new(uuid, 0, UploadState::Active))
    }

    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload> {
        let record = self.active_session(repo, uuid).await?;
        Ok(Upload::new(uuid, record.offset, record.state))
    }

    #[tracing::instrument(skip(self, chunk), fields(chunk = chunk.len()))]
    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload> {
        let mut record = self.active_session(repo, uuid).await?;

        let data_key = Self::upload_data(repo, uuid);
        let mut data = self.read(&data_key).await?.unwrap_or_default();
        data.extend_from_slice(&chunk);
        self.write(&data_key, &data).await?;

        record.offset = data.len() as u64;
        self.save_session(repo, uuid, &record).await?;

        Ok(Upload::new(uuid, record.offset, record.state))
    }

    #[tracing::instrument(skip(self))]
    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest> {
        let mut record = self.active_session(repo, uuid).await?;

        let data_key = Self::upload_data(repo, uuid);
        let data = self.read(&data_key).await?.unwrap_or_default();

        let mut sink = DigestSink::new();
        sink.update(&data);
        let actual = sink.finish();

        // The session stays active on mismatch; the client may retry the
        // finish or keep appending.
        if actual != *expected {
            return Err(Error::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        self.layer_put(repo, data.into(), Some(expected)).await?;

        record.state = UploadState::Completed;
        self.save_session(repo, uuid, &record).await?;
        self.storage.delete(&self.bucket, &data_key).await?;

        tracing::debug!(%repo, uuid, %expected, "upload session completed");
        Ok(expected.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()> {
        let mut record = self.active_session(repo, uuid).await?;

        record.state = UploadState::Cancelled;
        self.save_session(repo, uuid, &record).await?;
        self.storage
            .delete(&self.bucket, &Self::upload_data(repo, uuid))
            .await?;

        tracing::debug!(%repo, uuid, "upload session cancelled");
        Ok(())
    }
}
