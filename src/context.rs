//! Request scoping: which logical dataset an operation targets and on whose behalf.
//!
//! A [`RequestContext`] is threaded explicitly through every call instead of being
//! looked up from ambient state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::Authentication;
use crate::error::{RepoError, RepoResult};

/// Logical dataset a repository holds. Not a physical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryKind {
    Entities,
    Transactions,
    Schema,
    Application,
}

impl RepositoryKind {
    pub const ALL: [RepositoryKind; 4] = [
        RepositoryKind::Entities,
        RepositoryKind::Transactions,
        RepositoryKind::Schema,
        RepositoryKind::Application,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryKind::Entities => "ENTITIES",
            RepositoryKind::Transactions => "TRANSACTIONS",
            RepositoryKind::Schema => "SCHEMA",
            RepositoryKind::Application => "APPLICATION",
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepositoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepositoryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown repository kind: {s}"))
    }
}

/// Label of a tenant (application) dataset.
///
/// Labels end up in cache keys and directory names, so they are restricted to
/// ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope(String);

impl TenantScope {
    /// Scope used by anonymous, API-key and system principals.
    pub const DEFAULT: &'static str = "default";
    /// Scope used by test principals.
    pub const TEST: &'static str = "test";

    pub fn new(label: impl Into<String>) -> RepoResult<Self> {
        let label = label.into();
        let valid = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RepoError::InvalidScope { label });
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request state passed down the call chain.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    authentication: Option<Authentication>,
    scope: Option<TenantScope>,
}

impl RequestContext {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication: Some(authentication),
            scope: None,
        }
    }

    /// A context without any principal; every operation on it fails with
    /// `Authentication`.
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    pub fn system() -> Self {
        Self::new(Authentication::system())
    }

    pub fn anonymous() -> Self {
        Self::new(Authentication::anonymous())
    }

    pub fn test() -> Self {
        Self::new(Authentication::test())
    }

    /// Target an explicit tenant scope. Overrides the principal's default scope.
    pub fn with_scope(mut self, scope: TenantScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    pub fn scope(&self) -> Option<&TenantScope> {
        self.scope.as_ref()
    }

    /// The authenticated principal, or an `Authentication` error.
    pub fn require_authenticated(&self) -> RepoResult<&Authentication> {
        let auth = self.authentication.as_ref().ok_or_else(|| RepoError::Authentication {
            message: "failed to resolve repository due to missing authentication".into(),
        })?;
        if !auth.is_authenticated() {
            return Err(RepoError::Authentication {
                message: format!("{} is not authenticated", auth.principal()),
            });
        }
        Ok(auth)
    }

    /// Scope label the request resolves to: the explicit scope if set, otherwise
    /// the default of the principal.
    pub fn effective_scope(&self) -> RepoResult<String> {
        if let Some(scope) = &self.scope {
            return Ok(scope.as_str().to_string());
        }
        let auth = self.require_authenticated()?;
        Ok(auth.principal().default_scope().to_string())
    }
}
