//! Authentication and scope-based authorization.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use http::{header, HeaderMap};

use crate::entity::Entity;
use crate::error::{Error, RegistryResult};
use crate::name::RepoName;

/// What a scope permits on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read content.
    Pull,
    /// Write content, including the upload lifecycle.
    Push,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Pull => f.write_str("pull"),
            Action::Push => f.write_str("push"),
        }
    }
}

/// A permission scope, in the `repository:{name}:{action}` tradition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// One action on one repository.
    Repository {
        /// The repository the request addresses.
        name: RepoName,
        /// Pull or push.
        action: Action,
    },
    /// The registry-wide repository listing.
    Catalog,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Repository { name, action } => write!(f, "repository:{name}:{action}"),
            Scope::Catalog => f.write_str("registry:catalog:*"),
        }
    }
}

/// The scope a request must hold, or `None` for the bare version check.
pub fn required_scope(entity: &Entity, method: &http::Method) -> Option<Scope> {
    match entity {
        Entity::Base => None,
        Entity::Catalog => Some(Scope::Catalog),
        _ => {
            let name = entity.repo()?.clone();
            let action = if matches!(*method, http::Method::GET | http::Method::HEAD) {
                Action::Pull
            } else {
                Action::Push
            };
            Some(Scope::Repository { name, action })
        }
    }
}

/// Who a request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credentials presented.
    Anonymous,
    /// A named, credentialed user.
    User(String),
}

/// Resolves request credentials into an identity.
#[async_trait::async_trait]
pub trait Authenticator: fmt::Debug + Send + Sync {
    /// Identify the caller, failing with `UNAUTHORIZED` on bad credentials.
    async fn authenticate(&self, headers: &HeaderMap) -> RegistryResult<Identity>;
}

/// Decides whether an identity holds a scope.
#[async_trait::async_trait]
pub trait Permissions: fmt::Debug + Send + Sync {
    /// Whether `identity` may act within `scope`.
    async fn allows(&self, identity: &Identity, scope: &Scope) -> bool;
}

/// Treats every request as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait::async_trait]
impl Authenticator for Anonymous {
    async fn authenticate(&self, _headers: &HeaderMap) -> RegistryResult<Identity> {
        Ok(Identity::Anonymous)
    }
}

/// HTTP basic authentication against a fixed user table.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthenticator {
    users: HashMap<String, String>,
}

impl BasicAuthenticator {
    /// An authenticator with no users yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

#[async_trait::async_trait]
impl Authenticator for BasicAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> RegistryResult<Identity> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Identity::Anonymous);
        };

        let rejected = || Error::Unauthorized("invalid credentials".to_string());

        let encoded = value
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Basic "))
            .ok_or_else(rejected)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| rejected())?;
        let decoded = String::from_utf8(decoded).map_err(|_| rejected())?;
        let (username, password) = decoded.split_once(':').ok_or_else(rejected)?;

        match self.users.get(username) {
            Some(expected) if expected == password => Ok(Identity::User(username.to_string())),
            _ => Err(rejected()),
        }
    }
}

/// Grants every scope to every identity, anonymous included.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl Permissions for AllowAll {
    async fn allows(&self, _identity: &Identity, _scope: &Scope) -> bool {
        true
    }
}

/// Per-user action grants. Anonymous callers hold nothing.
#[derive(Debug, Clone, Default)]
pub struct UserPermissions {
    actions: HashMap<String, HashSet<Action>>,
    catalog: HashSet<String>,
}

impl UserPermissions {
    /// A table with no grants yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `action` on all repositories to `username`.
    pub fn grant(mut self, username: impl Into<String>, action: Action) -> Self {
        self.actions.entry(username.into()).or_default().insert(action);
        self
    }

    /// Grant the catalog listing to `username`.
    pub fn grant_catalog(mut self, username: impl Into<String>) -> Self {
        self.catalog.insert(username.into());
        self
    }
}

#[async_trait::async_trait]
impl Permissions for UserPermissions {
    async fn allows(&self, identity: &Identity, scope: &Scope) -> bool {
        let Identity::User(username) = identity else {
            return false;
        };
        match scope {
            Scope::Repository { action, .. } => self
                .actions
                .get(username)
                .is_some_and(|granted| granted.contains(action)),
            Scope::Catalog => self.catalog.contains(username),
        }
    }
}

/// The authentication pipeline applied to every request.
///
/// Insufficient permission differentiates by identity: an anonymous caller
/// gets `401 UNAUTHORIZED` (credentials might help), a named caller gets
/// `403 DENIED` (they will not).
#[derive(Debug, Clone)]
pub struct Auth {
    authenticator: Arc<dyn Authenticator>,
    permissions: Arc<dyn Permissions>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            authenticator: Arc::new(Anonymous),
            permissions: Arc::new(AllowAll),
        }
    }
}

impl Auth {
    /// Assemble a pipeline from its two halves.
    pub fn new(authenticator: Arc<dyn Authenticator>, permissions: Arc<dyn Permissions>) -> Self {
        Self {
            authenticator,
            permissions,
        }
    }

    /// Authenticate and, when a scope is required, authorize.
    pub async fn check(
        &self,
        headers: &HeaderMap,
        scope: Option<&Scope>,
    ) -> RegistryResult<Identity> {
        let identity = self.authenticator.authenticate(headers).await?;

        if let Some(scope) = scope {
            if !self.permissions.allows(&identity, scope).await {
                return Err(match &identity {
                    Identity::Anonymous => {
                        Error::Unauthorized(format!("scope {scope} requires credentials"))
                    }
                    Identity::User(username) => {
                        Error::Denied(format!("{username} lacks scope {scope}"))
                    }
                });
            }
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn basic(credentials: &str) -> HeaderMap {
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    fn pull(name: &str) -> Scope {
        Scope::Repository {
            name: name.parse().unwrap(),
            action: Action::Pull,
        }
    }

    #[tokio::test]
    async fn basic_credentials_resolve_to_a_user() {
        let authenticator = BasicAuthenticator::new().with_user("alice", "s3cret");

        let identity = authenticator.authenticate(&basic("alice:s3cret")).await.unwrap();
        assert_eq!(identity, Identity::User("alice".to_string()));

        let identity = authenticator.authenticate(&HeaderMap::new()).await.unwrap();
        assert_eq!(identity, Identity::Anonymous);

        let err = authenticator
            .authenticate(&basic("alice:wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn anonymous_denial_asks_for_credentials() {
        let auth = Auth::new(
            Arc::new(Anonymous),
            Arc::new(UserPermissions::new().grant("alice", Action::Pull)),
        );

        let err = auth
            .check(&HeaderMap::new(), Some(&pull("r")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn named_denial_is_forbidden() {
        let auth = Auth::new(
            Arc::new(BasicAuthenticator::new().with_user("bob", "pw")),
            Arc::new(UserPermissions::new().grant("bob", Action::Pull)),
        );

        let scope = Scope::Repository {
            name: "r".parse().unwrap(),
            action: Action::Push,
        };
        let err = auth.check(&basic("bob:pw"), Some(&scope)).await.unwrap_err();
        assert!(matches!(err, Error::Denied(_)));

        // The granted scope passes.
        auth.check(&basic("bob:pw"), Some(&pull("r"))).await.unwrap();
    }

    #[test]
    fn scopes_for_entities() {
        let entity = Entity::parse("/v2/library/ubuntu/tags/list").unwrap();
        assert_eq!(
            required_scope(&entity, &http::Method::GET),
            Some(pull("library/ubuntu"))
        );

        let entity = Entity::parse("/v2/r/blobs/uploads/").unwrap();
        assert_eq!(
            required_scope(&entity, &http::Method::POST),
            Some(Scope::Repository {
                name: "r".parse().unwrap(),
                action: Action::Push,
            })
        );

        assert_eq!(
            required_scope(&Entity::Catalog, &http::Method::GET),
            Some(Scope::Catalog)
        );
        assert_eq!(required_scope(&Entity::Base, &http::Method::GET), None);
    }
}
