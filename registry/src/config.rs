//! Server configuration and backend composition.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use dockyard_storage::StorageConfig;
use http::Uri;
use serde::Deserialize;

use crate::api::RegistryBuilder;
use crate::auth::BasicAuthenticator;
use crate::cache::{CacheDocker, CacheScope};
use crate::docker::Docker;
use crate::local::LocalDocker;
use crate::multi::MultiReadDocker;
use crate::name::RepoName;
use crate::proxy::ProxyDocker;
use crate::read_write::ReadWriteDocker;
use crate::trimmed::TrimmedDocker;

/// A configuration file problem.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("read {path}: {error}")]
    Read {
        /// The configuration file path.
        path: String,
        /// The underlying I/O failure.
        #[source]
        error: std::io::Error,
    },

    /// The file could not be parsed.
    #[error("parse {path}: {error}")]
    Parse {
        /// The configuration file path.
        path: String,
        /// The underlying TOML failure.
        #[source]
        error: toml_edit::de::Error,
    },

    /// A setting failed validation.
    #[error("invalid setting {setting}: {message}")]
    Invalid {
        /// The offending setting name.
        setting: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 5000).into()
}

fn default_bucket() -> String {
    "registry".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

/// Pull-through proxy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProxyConfig {
    /// The upstream registry, e.g. `https://registry-1.docker.io`.
    pub upstream: String,

    /// How long a cached tag pointer stays trusted.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Which repositories to cache: `"*"` or a name prefix.
    #[serde(default)]
    pub scope: Option<String>,
}

/// A basic-auth user entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserConfig {
    /// The username.
    pub username: String,
    /// The password.
    pub password: String,
}

/// The server configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// The address to serve on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Where registry content lives.
    pub storage: StorageConfig,

    /// The bucket inside the storage backend.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Optional pull-through proxying.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Mount the registry under a repository-name prefix.
    #[serde(default)]
    pub trim_prefix: Option<String>,

    /// Basic-auth users; an empty list leaves the registry open.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Utf8Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_string(),
            error,
        })?;
        toml_edit::de::from_str(&text).map_err(|error| ConfigError::Parse {
            path: path.to_string(),
            error,
        })
    }

    /// Compose the registry backend this configuration describes.
    ///
    /// With a proxy section the stack is the classic pull-through layout:
    /// reads consult the local store first, then a cache backed by the
    /// upstream; every write goes to the local store alone. A trim prefix
    /// wraps the whole stack last.
    pub fn build_docker(&self) -> Result<Arc<dyn Docker>, ConfigError> {
        let storage = self.storage.clone().build();
        let local = Arc::new(LocalDocker::new(storage.clone(), self.bucket.clone()));

        let mut docker: Arc<dyn Docker> = match &self.proxy {
            None => local,
            Some(proxy) => {
                let upstream: Uri =
                    proxy
                        .upstream
                        .parse()
                        .map_err(|err| ConfigError::Invalid {
                            setting: "proxy.upstream",
                            message: format!("{}: {err}", proxy.upstream),
                        })?;
                let scope = match proxy.scope.as_deref() {
                    None | Some("*") => CacheScope::All,
                    Some(prefix) => CacheScope::Prefix(prefix.parse::<RepoName>().map_err(
                        |_| ConfigError::Invalid {
                            setting: "proxy.scope",
                            message: format!("{prefix} is not a repository name"),
                        },
                    )?),
                };

                // Cached upstream content lives in a sibling bucket so it
                // never mixes with authoritative local content.
                let cache_store = Arc::new(LocalDocker::new(
                    storage,
                    format!("{}-cache", self.bucket),
                ));
                let cached = Arc::new(CacheDocker::new(
                    Arc::new(ProxyDocker::new(upstream)),
                    cache_store,
                    Duration::from_secs(proxy.ttl_secs),
                    scope,
                ));

                let read = Arc::new(MultiReadDocker::new(vec![local.clone(), cached]));
                Arc::new(ReadWriteDocker::new(read, local))
            }
        };

        if let Some(prefix) = &self.trim_prefix {
            let prefix = prefix
                .parse::<RepoName>()
                .map_err(|_| ConfigError::Invalid {
                    setting: "trim-prefix",
                    message: format!("{prefix} is not a repository name"),
                })?;
            docker = Arc::new(TrimmedDocker::new(docker, prefix));
        }

        Ok(docker)
    }

    /// Assemble the HTTP service this configuration describes.
    pub fn build_service(&self) -> Result<axum::Router, ConfigError> {
        let mut builder = RegistryBuilder::default().docker(self.build_docker()?);

        if !self.users.is_empty() {
            let mut authenticator = BasicAuthenticator::new();
            for user in &self.users {
                authenticator = authenticator.with_user(&user.username, &user.password);
            }
            builder = builder.authenticator(Arc::new(authenticator));
        }

        Ok(builder.build())
    }
}
