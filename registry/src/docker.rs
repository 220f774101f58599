//! The polymorphic registry capability and its per-repository facade.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::name::{Reference, RepoName};
use crate::paginate::Pagination;

/// A content-addressed byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    digest: Digest,
    data: Bytes,
}

impl Blob {
    /// Wrap already-verified content under its digest.
    pub fn new(digest: Digest, data: Bytes) -> Self {
        Self { digest, data }
    }

    /// The content digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The content size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The content bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the blob, yielding its bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// A manifest document together with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    digest: Digest,
    data: Bytes,
}

impl Manifest {
    /// Wrap manifest content under its digest.
    pub fn new(digest: Digest, data: Bytes) -> Self {
        Self { digest, data }
    }

    /// The content digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The content size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The manifest bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the manifest, yielding its bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// The media type declared by the content, falling back on schema
    /// heuristics, defaulting to the OCI manifest type.
    pub fn media_type(&self) -> String {
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&self.data) {
            if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
                return media_type.to_string();
            }

            if let Some(schema_version) = json.get("schemaVersion").and_then(|v| v.as_u64()) {
                return match schema_version {
                    1 => "application/vnd.docker.distribution.manifest.v1+json".to_string(),
                    2 if json.get("manifests").is_some() => {
                        "application/vnd.docker.distribution.manifest.list.v2+json".to_string()
                    }
                    2 => "application/vnd.docker.distribution.manifest.v2+json".to_string(),
                    _ => "application/vnd.oci.image.manifest.v1+json".to_string(),
                };
            }
        }

        "application/vnd.oci.image.manifest.v1+json".to_string()
    }
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadState {
    /// Accepting appends.
    Active,
    /// Finished; the content has moved into the blob store.
    Completed,
    /// Cancelled; buffered bytes are discarded.
    Cancelled,
}

impl UploadState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadState::Active)
    }
}

/// A resumable blob-write session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    uuid: String,
    offset: u64,
    state: UploadState,
}

impl Upload {
    /// Assemble a session snapshot.
    pub fn new(uuid: impl Into<String>, offset: u64, state: UploadState) -> Self {
        Self {
            uuid: uuid.into(),
            offset,
            state,
        }
    }

    /// The opaque session id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The end of the contiguous byte range `[0, offset)` accepted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The session state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The `Range` header value for this session.
    ///
    /// By convention an empty session reports `0-0`.
    pub fn range(&self) -> String {
        if self.offset == 0 {
            "0-0".to_string()
        } else {
            format!("0-{}", self.offset - 1)
        }
    }
}

/// The registry capability: blobs, manifests, tags, uploads and the catalog
/// for every repository behind one interface.
///
/// Every backend (local store, remote proxy) and every combinator
/// (multi-read, cache, read/write split, trimming) implements this trait, so
/// any of them is substitutable wherever a registry is consumed.
#[async_trait::async_trait]
pub trait Docker: fmt::Debug + Send + Sync {
    /// List repository names, page bounded by the cursor.
    async fn catalog(&self, page: &Pagination) -> RegistryResult<Vec<RepoName>>;

    /// Whether a blob is known to the repository.
    async fn layer_exists(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<bool>;

    /// Fetch a blob, or `None` when absent.
    async fn layer_get(&self, repo: &RepoName, digest: &Digest) -> RegistryResult<Option<Blob>>;

    /// Store blob content, computing its digest unless the caller asserts one
    /// from an already-verified source.
    async fn layer_put(
        &self,
        repo: &RepoName,
        data: Bytes,
        asserted: Option<&Digest>,
    ) -> RegistryResult<Blob>;

    /// Link a blob already present in `from` into `repo` without copying
    /// bytes. `None` when the blob is not known to `from`.
    async fn layer_mount(
        &self,
        repo: &RepoName,
        digest: &Digest,
        from: &RepoName,
    ) -> RegistryResult<Option<Digest>>;

    /// Resolve a reference to a manifest, or `None` when absent.
    async fn manifest_get(
        &self,
        repo: &RepoName,
        reference: &Reference,
    ) -> RegistryResult<Option<Manifest>>;

    /// Store a manifest under a reference, returning the content digest.
    ///
    /// A digest reference that does not match the content fails with
    /// `DIGEST_INVALID` and writes nothing.
    async fn manifest_put(
        &self,
        repo: &RepoName,
        reference: &Reference,
        data: Bytes,
    ) -> RegistryResult<Digest>;

    /// List the tags currently pointing at stored manifests.
    async fn tags(&self, repo: &RepoName, page: &Pagination) -> RegistryResult<Vec<String>>;

    /// Open a new upload session.
    async fn upload_start(&self, repo: &RepoName) -> RegistryResult<Upload>;

    /// Read-only peek at an active session.
    async fn upload_status(&self, repo: &RepoName, uuid: &str) -> RegistryResult<Upload>;

    /// Append a chunk to an active session, contiguously.
    async fn upload_append(
        &self,
        repo: &RepoName,
        uuid: &str,
        chunk: Bytes,
    ) -> RegistryResult<Upload>;

    /// Verify the accumulated bytes against `expected` and move them into the
    /// blob store. On mismatch the session stays active and retryable.
    async fn upload_finish(
        &self,
        repo: &RepoName,
        uuid: &str,
        expected: &Digest,
    ) -> RegistryResult<Digest>;

    /// Cancel an active session, discarding buffered bytes.
    ///
    /// Cancelling an already-terminal session is an error, not a no-op.
    async fn upload_cancel(&self, repo: &RepoName, uuid: &str) -> RegistryResult<()>;
}

/// Facade access to one repository of a [`Docker`] backend.
pub trait DockerExt: Docker {
    /// A view of one repository.
    fn repo<'a>(&'a self, name: &'a RepoName) -> Repo<'a>;
}

impl<D: Docker> DockerExt for D {
    fn repo<'a>(&'a self, name: &'a RepoName) -> Repo<'a> {
        Repo { docker: self, name }
    }
}

impl<'d> DockerExt for dyn Docker + 'd {
    fn repo<'a>(&'a self, name: &'a RepoName) -> Repo<'a> {
        Repo { docker: self, name }
    }
}

/// A single repository of a registry: layers, manifests and uploads.
#[derive(Debug, Clone, Copy)]
pub struct Repo<'a> {
    docker: &'a dyn Docker,
    name: &'a RepoName,
}

impl<'a> Repo<'a> {
    /// The repository name.
    pub fn name(&self) -> &RepoName {
        self.name
    }

    /// The blob store of this repository.
    pub fn layers(&self) -> Layers<'a> {
        Layers(*self)
    }

    /// The manifest store of this repository.
    pub fn manifests(&self) -> Manifests<'a> {
        Manifests(*self)
    }

    /// The upload sessions of this repository.
    pub fn uploads(&self) -> Uploads<'a> {
        Uploads(*self)
    }
}

/// Blob operations scoped to one repository.
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a>(Repo<'a>);

impl Layers<'_> {
    /// Whether a blob is known.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        self.0.docker.layer_exists(self.0.name, digest).await
    }

    /// Fetch a blob.
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        self.0.docker.layer_get(self.0.name, digest).await
    }

    /// Store blob content.
    pub async fn put(&self, data: Bytes, asserted: Option<&Digest>) -> RegistryResult<Blob> {
        self.0.docker.layer_put(self.0.name, data, asserted).await
    }

    /// Mount a blob from another repository.
    pub async fn mount(&self, digest: &Digest, from: &RepoName) -> RegistryResult<Option<Digest>> {
        self.0.docker.layer_mount(self.0.name, digest, from).await
    }
}

/// Manifest operations scoped to one repository.
#[derive(Debug, Clone, Copy)]
pub struct Manifests<'a>(Repo<'a>);

impl Manifests<'_> {
    /// Resolve a reference.
    pub async fn get(&self, reference: &Reference) -> RegistryResult<Option<Manifest>> {
        self.0.docker.manifest_get(self.0.name, reference).await
    }

    /// Store a manifest.
    pub async fn put(&self, reference: &Reference, data: Bytes) -> RegistryResult<Digest> {
        self.0
            .docker
            .manifest_put(self.0.name, reference, data)
            .await
    }

    /// List tags.
    pub async fn tags(&self, page: &Pagination) -> RegistryResult<Vec<String>> {
        self.0.docker.tags(self.0.name, page).await
    }
}

/// Upload-session operations scoped to one repository.
#[derive(Debug, Clone, Copy)]
pub struct Uploads<'a>(Repo<'a>);

impl Uploads<'_> {
    /// Open a new session.
    pub async fn start(&self) -> RegistryResult<Upload> {
        self.0.docker.upload_start(self.0.name).await
    }

    /// Peek at a session.
    pub async fn status(&self, uuid: &str) -> RegistryResult<Upload> {
        self.0.docker.upload_status(self.0.name, uuid).await
    }

    /// Append a chunk.
    pub async fn append(&self, uuid: &str, chunk: Bytes) -> RegistryResult<Upload> {
        self.0.docker.upload_append(self.0.name, uuid, chunk).await
    }

    /// Verify and commit.
    pub async fn finish(&self, uuid: &str, expected: &Digest) -> RegistryResult<Digest> {
        self.0.docker.upload_finish(self.0.name, uuid, expected).await
    }

    /// Cancel.
    pub async fn cancel(&self, uuid: &str) -> RegistryResult<()> {
        self.0.docker.upload_cancel(self.0.name, uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;
    use crate::local::LocalDocker;

    #[tokio::test]
    async fn facade_views_forward_to_the_backend() {
        let docker = LocalDocker::new(
            dockyard_storage::MemoryStorage::with_buckets(&["registry"]).into(),
            "registry",
        );
        let name: RepoName = "library/app".parse().unwrap();
        let other: RepoName = "library/base".parse().unwrap();

        // Through a concrete backend.
        let repo = docker.repo(&name);
        let blob = repo
            .layers()
            .put(Bytes::from_static(b"layer bytes"), None)
            .await
            .unwrap();
        assert!(repo.layers().exists(blob.digest()).await.unwrap());

        // Through a trait object, as the handlers hold it.
        let as_dyn: &dyn Docker = &docker;
        let repo = as_dyn.repo(&name);
        assert!(repo.layers().get(blob.digest()).await.unwrap().is_some());
        assert_eq!(
            as_dyn
                .repo(&other)
                .layers()
                .mount(blob.digest(), &name)
                .await
                .unwrap()
                .as_ref(),
            Some(blob.digest())
        );

        let tag = Reference::Tag("latest".to_string());
        let digest = repo
            .manifests()
            .put(&tag, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(repo.manifests().get(&tag).await.unwrap().is_some());
        assert!(repo
            .manifests()
            .get(&Reference::Digest(digest))
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            repo.manifests().tags(&Pagination::default()).await.unwrap(),
            vec!["latest".to_string()]
        );

        let upload = repo.uploads().start().await.unwrap();
        let upload = repo
            .uploads()
            .append(upload.uuid(), Bytes::from_static(b"chunk"))
            .await
            .unwrap();
        assert_eq!(repo.uploads().status(upload.uuid()).await.unwrap().offset(), 5);
        repo.uploads().cancel(upload.uuid()).await.unwrap();
        assert!(matches!(
            repo.uploads().status(upload.uuid()).await,
            Err(Error::UploadUnknown(_))
        ));
    }

    #[test]
    fn upload_range_convention() {
        let empty = Upload::new("u", 0, UploadState::Active);
        assert_eq!(empty.range(), "0-0");

        let one = Upload::new("u", 1, UploadState::Active);
        assert_eq!(one.range(), "0-0");

        let full = Upload::new("u", 128, UploadState::Active);
        assert_eq!(full.range(), "0-127");
    }

    #[test]
    fn media_type_detection() {
        let explicit = Manifest::new(
            Digest::of_bytes(b"{}"),
            Bytes::from_static(br#"{"mediaType":"application/vnd.oci.image.index.v1+json"}"#),
        );
        assert_eq!(
            explicit.media_type(),
            "application/vnd.oci.image.index.v1+json"
        );

        let schema_v2 = Manifest::new(
            Digest::of_bytes(b"{}"),
            Bytes::from_static(br#"{"schemaVersion":2,"config":{}}"#),
        );
        assert_eq!(
            schema_v2.media_type(),
            "application/vnd.docker.distribution.manifest.v2+json"
        );

        let list = Manifest::new(
            Digest::of_bytes(b"{}"),
            Bytes::from_static(br#"{"schemaVersion":2,"manifests":[]}"#),
        );
        assert_eq!(
            list.media_type(),
            "application/vnd.docker.distribution.manifest.list.v2+json"
        );

        let opaque = Manifest::new(Digest::of_bytes(b"x"), Bytes::from_static(b"not json"));
        assert_eq!(
            opaque.media_type(),
            "application/vnd.oci.image.manifest.v1+json"
        );
    }
}
