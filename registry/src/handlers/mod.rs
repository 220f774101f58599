//! Request dispatch and the entity handlers.

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{Method, Request};

use crate::api::AppState;
use crate::auth::required_scope;
use crate::entity::Entity;
use crate::error::{Error, RegistryResult};

mod blob;
mod catalog;
mod manifest;
mod upload;

/// The single entry point behind the router fallback.
///
/// Repository names may span any number of path segments, which rules out a
/// fixed route table; instead every request is matched against the v2 path
/// grammar here and dispatched on `(entity, method)`. A method the entity
/// does not support maps to `405 UNSUPPORTED`.
pub async fn dispatch(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, Error> {
    let (parts, body) = request.into_parts();
    let method = parts.method;

    let entity = Entity::parse(parts.uri.path())?;
    let identity = state
        .auth()
        .check(&parts.headers, required_scope(&entity, &method).as_ref())
        .await?;
    tracing::debug!(?entity, %method, ?identity, "dispatching");

    let docker = state.docker();
    let query = parts.uri.query();

    match entity {
        Entity::Base if method == Method::GET || method == Method::HEAD => {
            Ok(().into_response())
        }

        Entity::Catalog if method == Method::GET => catalog::list(docker, query).await,
        Entity::Tags { ref repo } if method == Method::GET => {
            catalog::tags(docker, repo, query).await
        }

        Entity::Blob {
            ref repo,
            ref digest,
        } if method == Method::GET || method == Method::HEAD => {
            blob::get(docker, repo, digest, method == Method::HEAD).await
        }

        Entity::Manifest {
            ref repo,
            ref reference,
        } if method == Method::GET || method == Method::HEAD => {
            manifest::get(docker, repo, reference, method == Method::HEAD).await
        }
        Entity::Manifest {
            ref repo,
            ref reference,
        } if method == Method::PUT => {
            let data = collect(body).await?;
            manifest::put(docker, repo, reference, data).await
        }

        Entity::Uploads { ref repo } if method == Method::POST => {
            let data = collect(body).await?;
            upload::start(docker, repo, query, data).await
        }
        Entity::Upload { ref repo, ref uuid } if method == Method::PATCH => {
            let chunk = collect(body).await?;
            upload::append(docker, repo, uuid, chunk).await
        }
        Entity::Upload { ref repo, ref uuid } if method == Method::PUT => {
            let data = collect(body).await?;
            upload::finish(docker, repo, uuid, query, data).await
        }
        Entity::Upload { ref repo, ref uuid } if method == Method::GET => {
            upload::status(docker, repo, uuid).await
        }
        Entity::Upload { ref repo, ref uuid } if method == Method::DELETE => {
            upload::cancel(docker, repo, uuid).await
        }

        ref entity => Err(Error::Unsupported(format!("{method} on {entity:?}"))),
    }
}

async fn collect(body: Body) -> RegistryResult<Bytes> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| Error::Malformed(format!("unreadable request body: {err}")))
}
