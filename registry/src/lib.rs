//! # dockyard
//!
//! A Docker / OCI distribution v2 registry over pluggable storage.
//!
//! The heart of the crate is the [`Docker`](docker::Docker) trait: one
//! capability covering blobs, manifests, tags, uploads and the catalog.
//! [`LocalDocker`](local::LocalDocker) implements it over a
//! [`dockyard_storage::Storage`] bucket, [`ProxyDocker`](proxy::ProxyDocker)
//! over an upstream registry's HTTP API, and the combinators compose them:
//!
//! - [`MultiReadDocker`](multi::MultiReadDocker): read fan-out, first
//!   present result wins;
//! - [`CacheDocker`](cache::CacheDocker): pull-through caching with a TTL
//!   on mutable tag pointers;
//! - [`ReadWriteDocker`](read_write::ReadWriteDocker): reads and writes
//!   routed to different backends;
//! - [`TrimmedDocker`](trimmed::TrimmedDocker): mounts a registry under a
//!   repository-name prefix.
//!
//! [`api::RegistryBuilder`] wraps any backend in an [`axum`] router speaking
//! the v2 HTTP protocol.
//!
//! ```
//! use dockyard::api::RegistryBuilder;
//!
//! let router = RegistryBuilder::default().bucket("images").build();
//! # let _ = router;
//! ```

pub mod api;
pub mod auth;
pub mod cache;
#[cfg(feature = "cli")]
pub mod config;
pub mod digest;
pub mod docker;
pub mod entity;
pub mod error;
pub(crate) mod handlers;
pub mod headers;
pub mod local;
pub mod multi;
pub mod name;
pub mod paginate;
pub mod proxy;
pub mod read_write;
pub mod trimmed;

#[doc(inline)]
pub use self::digest::Digest;
#[doc(inline)]
pub use self::docker::{Blob, Docker, DockerExt, Manifest, Upload, UploadState};
#[doc(inline)]
pub use self::error::{Error, RegistryResult};
#[doc(inline)]
pub use self::name::{Reference, RepoName};
#[doc(inline)]
pub use self::paginate::Pagination;
