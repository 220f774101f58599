//! Catalog and tag listing handlers.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::docker::{Docker, DockerExt as _};
use crate::error::RegistryResult;
use crate::name::RepoName;
use crate::paginate::Pagination;

#[derive(Debug, Serialize)]
struct CatalogBody {
    repositories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TagsBody {
    name: String,
    tags: Vec<String>,
}

/// `GET /v2/_catalog?n=&last=`
pub async fn list(docker: &dyn Docker, query: Option<&str>) -> RegistryResult<Response> {
    let page = Pagination::from_query(query)?;
    let repositories = docker
        .catalog(&page)
        .await?
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    Ok(Json(CatalogBody { repositories }).into_response())
}

/// `GET /v2/{name}/tags/list?n=&last=`
pub async fn tags(
    docker: &dyn Docker,
    repo: &RepoName,
    query: Option<&str>,
) -> RegistryResult<Response> {
    let page = Pagination::from_query(query)?;
    let tags = docker.repo(repo).manifests().tags(&page).await?;
    Ok(Json(TagsBody {
        name: repo.to_string(),
        tags,
    })
    .into_response())
}
