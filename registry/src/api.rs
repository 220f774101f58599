//! Router assembly and service state.

use std::sync::Arc;

use axum::Router;
use dockyard_storage::Storage;
use http::HeaderValue;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{Auth, Authenticator, Permissions};
use crate::docker::Docker;
use crate::handlers;
use crate::headers;
use crate::local::LocalDocker;

/// Shared state behind the router.
#[derive(Debug, Clone)]
pub struct AppState {
    docker: Arc<dyn Docker>,
    auth: Auth,
}

impl AppState {
    /// The registry backend serving this router.
    pub fn docker(&self) -> &dyn Docker {
        &*self.docker
    }

    /// The authentication pipeline.
    pub fn auth(&self) -> &Auth {
        &self.auth
    }
}

/// Builder for a registry HTTP service.
///
/// The backend is either given directly with [`docker`](Self::docker)
/// (commonly a composed stack of combinators) or assembled from a storage
/// handle and bucket name. Without either, the registry runs on in-memory
/// storage.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    bucket: Option<String>,
    docker: Option<Arc<dyn Docker>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    permissions: Option<Arc<dyn Permissions>>,
}

impl RegistryBuilder {
    /// Back the registry with a storage handle.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The bucket inside the storage handle (defaults to `registry`).
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Use an explicit backend, overriding any storage configuration.
    pub fn docker(mut self, docker: Arc<dyn Docker>) -> Self {
        self.docker = Some(docker);
        self
    }

    /// Authenticate requests with `authenticator` (default: anonymous).
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Authorize scopes with `permissions` (default: allow everything).
    pub fn permissions(mut self, permissions: Arc<dyn Permissions>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Assemble the router.
    pub fn build(self) -> Router {
        let docker = self.docker.unwrap_or_else(|| {
            let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());
            let storage = self.storage.unwrap_or_else(|| {
                dockyard_storage::MemoryStorage::with_buckets(&[&bucket]).into()
            });
            Arc::new(LocalDocker::new(storage, bucket))
        });

        let auth = Auth::new(
            self.authenticator
                .unwrap_or_else(|| Arc::new(crate::auth::Anonymous)),
            self.permissions
                .unwrap_or_else(|| Arc::new(crate::auth::AllowAll)),
        );

        service(docker, auth)
    }
}

/// The registry router over a backend and authentication pipeline.
///
/// Every route goes through the fallback dispatcher, since composite
/// repository names cannot be expressed as a static route table. Every
/// response carries the API version header.
pub fn service(docker: Arc<dyn Docker>, auth: Auth) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .layer(SetResponseHeaderLayer::if_not_present(
            headers::API_VERSION,
            HeaderValue::from_static(headers::API_VERSION_VALUE),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { docker, auth })
}
