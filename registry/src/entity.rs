//! The v2 path grammar.

use serde::Deserialize;

use crate::digest::Digest;
use crate::error::{Error, RegistryResult};
use crate::name::{Reference, RepoName};

/// An addressable entity of the v2 protocol.
///
/// Repository names may span several path segments, so the grammar is
/// anchored on the fixed suffixes (`blobs/…`, `manifests/…`, `tags/list`,
/// `blobs/uploads/…`) and everything before the suffix is the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// `/v2/`, the version check.
    Base,
    /// `/v2/_catalog`, the repository listing.
    Catalog,
    /// `/v2/{name}/tags/list`
    Tags {
        /// The addressed repository.
        repo: RepoName,
    },
    /// `/v2/{name}/blobs/{digest}`
    Blob {
        /// The addressed repository.
        repo: RepoName,
        /// The blob digest.
        digest: Digest,
    },
    /// `/v2/{name}/manifests/{reference}`
    Manifest {
        /// The addressed repository.
        repo: RepoName,
        /// Tag or digest.
        reference: Reference,
    },
    /// `/v2/{name}/blobs/uploads/`, the session collection.
    Uploads {
        /// The addressed repository.
        repo: RepoName,
    },
    /// `/v2/{name}/blobs/uploads/{uuid}`, one session.
    Upload {
        /// The addressed repository.
        repo: RepoName,
        /// The session id.
        uuid: String,
    },
}

impl Entity {
    /// Match a request path against the grammar.
    pub fn parse(path: &str) -> RegistryResult<Entity> {
        let unknown = || Error::RouteUnknown(path.to_string());

        let rest = path.strip_prefix("/v2").ok_or_else(unknown)?;
        let rest = match rest.strip_prefix('/') {
            Some(rest) => rest,
            None if rest.is_empty() => return Ok(Entity::Base),
            None => return Err(unknown()),
        };

        if rest.is_empty() {
            return Ok(Entity::Base);
        }
        if rest == "_catalog" {
            return Ok(Entity::Catalog);
        }

        if let Some(name) = rest.strip_suffix("/tags/list") {
            return Ok(Entity::Tags { repo: name.parse()? });
        }

        // Uploads before blobs: `blobs/uploads/…` also contains `/blobs/`.
        if let Some((name, uuid)) = rest.rsplit_once("/blobs/uploads/") {
            let repo = name.parse()?;
            if uuid.is_empty() {
                return Ok(Entity::Uploads { repo });
            }
            if !is_session_id(uuid) {
                return Err(Error::UploadUnknown(uuid.to_string()));
            }
            return Ok(Entity::Upload {
                repo,
                uuid: uuid.to_string(),
            });
        }
        if let Some(name) = rest.strip_suffix("/blobs/uploads") {
            return Ok(Entity::Uploads { repo: name.parse()? });
        }

        if let Some((name, digest)) = rest.rsplit_once("/blobs/") {
            return Ok(Entity::Blob {
                repo: name.parse()?,
                digest: digest.parse()?,
            });
        }

        if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
            return Ok(Entity::Manifest {
                repo: name.parse()?,
                reference: reference.parse()?,
            });
        }

        Err(unknown())
    }

    /// The repository this entity addresses, if any.
    pub fn repo(&self) -> Option<&RepoName> {
        match self {
            Entity::Base | Entity::Catalog => None,
            Entity::Tags { repo }
            | Entity::Blob { repo, .. }
            | Entity::Manifest { repo, .. }
            | Entity::Uploads { repo }
            | Entity::Upload { repo, .. } => Some(repo),
        }
    }
}

/// Session ids must stay a single path segment, since backends splice them
/// into storage keys. This is the `[a-zA-Z0-9_.=-]` shape the server itself
/// issues, with the dot-only segments excluded.
fn is_session_id(uuid: &str) -> bool {
    uuid != "."
        && uuid != ".."
        && uuid
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'='))
}

/// Query parameters of `POST /v2/{name}/blobs/uploads/`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Monolithic upload: finish immediately with this digest.
    pub digest: Option<String>,
    /// Cross-repository mount: the blob to link.
    pub mount: Option<String>,
    /// Cross-repository mount: the source repository.
    pub from: Option<String>,
}

impl UploadQuery {
    /// Parse the query string of an upload POST.
    pub fn parse(query: Option<&str>) -> RegistryResult<Self> {
        let Some(query) = query else {
            return Ok(Self::default());
        };
        serde_urlencoded::from_str(query)
            .map_err(|err| Error::Malformed(format!("query string: {err}")))
    }
}

/// Query parameters of `PUT /v2/{name}/blobs/uploads/{uuid}`.
#[derive(Debug, Deserialize)]
pub struct FinishQuery {
    /// The digest the accumulated content must hash to.
    pub digest: String,
}

impl FinishQuery {
    /// Parse the query string of an upload finish, where `digest` is
    /// mandatory.
    pub fn parse(query: Option<&str>) -> RegistryResult<Self> {
        let Some(query) = query else {
            return Err(Error::DigestInvalid("missing digest parameter".to_string()));
        };
        serde_urlencoded::from_str(query)
            .map_err(|_| Error::DigestInvalid("missing digest parameter".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str) -> RepoName {
        name.parse().unwrap()
    }

    #[test]
    fn base_and_catalog() {
        assert_eq!(Entity::parse("/v2/").unwrap(), Entity::Base);
        assert_eq!(Entity::parse("/v2").unwrap(), Entity::Base);
        assert_eq!(Entity::parse("/v2/_catalog").unwrap(), Entity::Catalog);
    }

    #[test]
    fn blob_with_composite_name() {
        let digest = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let entity = Entity::parse(&format!("/v2/library/ubuntu/blobs/{digest}")).unwrap();
        assert_eq!(
            entity,
            Entity::Blob {
                repo: repo("library/ubuntu"),
                digest: digest.parse().unwrap(),
            }
        );
    }

    #[test]
    fn manifest_by_tag_and_digest() {
        let entity = Entity::parse("/v2/a/b/c/manifests/latest").unwrap();
        assert_eq!(
            entity,
            Entity::Manifest {
                repo: repo("a/b/c"),
                reference: Reference::Tag("latest".to_string()),
            }
        );

        let digest = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let entity = Entity::parse(&format!("/v2/r/manifests/{digest}")).unwrap();
        assert!(matches!(
            entity,
            Entity::Manifest {
                reference: Reference::Digest(_),
                ..
            }
        ));
    }

    #[test]
    fn upload_collection_and_session() {
        assert_eq!(
            Entity::parse("/v2/r/blobs/uploads/").unwrap(),
            Entity::Uploads { repo: repo("r") }
        );
        assert_eq!(
            Entity::parse("/v2/library/ubuntu/blobs/uploads/some-uuid").unwrap(),
            Entity::Upload {
                repo: repo("library/ubuntu"),
                uuid: "some-uuid".to_string(),
            }
        );
    }

    #[test]
    fn session_ids_are_single_segments() {
        for path in [
            "/v2/r/blobs/uploads/../x",
            "/v2/r/blobs/uploads/..",
            "/v2/r/blobs/uploads/../../_manifests/tags",
            "/v2/r/blobs/uploads/a%2Fb",
        ] {
            assert!(
                matches!(Entity::parse(path).unwrap_err(), Error::UploadUnknown(_)),
                "{path} must not address a session"
            );
        }
    }

    #[test]
    fn tags_listing() {
        assert_eq!(
            Entity::parse("/v2/library/ubuntu/tags/list").unwrap(),
            Entity::Tags {
                repo: repo("library/ubuntu")
            }
        );
    }

    #[test]
    fn malformed_paths() {
        assert!(matches!(
            Entity::parse("/other").unwrap_err(),
            Error::RouteUnknown(_)
        ));
        assert!(matches!(
            Entity::parse("/v2/name-only").unwrap_err(),
            Error::RouteUnknown(_)
        ));
        assert!(matches!(
            Entity::parse("/v2/UPPER/blobs/sha256:00").unwrap_err(),
            Error::NameInvalid(_)
        ));
        assert!(matches!(
            Entity::parse("/v2/r/blobs/not-a-digest").unwrap_err(),
            Error::DigestInvalid(_)
        ));
        assert!(matches!(
            Entity::parse("/v2/r/manifests/..bad").unwrap_err(),
            Error::TagInvalid(_)
        ));
    }

    #[test]
    fn upload_queries() {
        let query = UploadQuery::parse(Some("mount=sha256:aa&from=other/repo")).unwrap();
        assert_eq!(query.mount.as_deref(), Some("sha256:aa"));
        assert_eq!(query.from.as_deref(), Some("other/repo"));
        assert!(query.digest.is_none());

        assert!(FinishQuery::parse(None).is_err());
        let query = FinishQuery::parse(Some("digest=sha256:aa")).unwrap();
        assert_eq!(query.digest, "sha256:aa");
    }
}
