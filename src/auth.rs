//! Authorities, principals and the gate that checks them.
//!
//! Authorities are totally ordered: `SYSTEM > APPLICATION > CONTRIBUTOR > READER`.
//! Holding an authority implies holding every authority ranked below it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::{RepositoryKind, TenantScope};
use crate::error::{RepoError, RepoResult};

/// Ranked permission level. The derived `Ord` is the authority ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authority {
    Reader,
    Contributor,
    Application,
    System,
}

impl Authority {
    pub fn as_str(self) -> &'static str {
        match self {
            Authority::Reader => "READER",
            Authority::Contributor => "CONTRIBUTOR",
            Authority::Application => "APPLICATION",
            Authority::System => "SYSTEM",
        }
    }

    /// Whether any of the `granted` authorities ranks at or above `self`.
    pub fn satisfied_by<'a>(self, granted: impl IntoIterator<Item = &'a Authority>) -> bool {
        granted.into_iter().any(|g| *g >= self)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READER" => Ok(Authority::Reader),
            "CONTRIBUTOR" => Ok(Authority::Contributor),
            "APPLICATION" => Ok(Authority::Application),
            "SYSTEM" => Ok(Authority::System),
            other => Err(format!("unknown authority: {other}")),
        }
    }
}

/// Kind of principal behind an authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// Internal jobs and administrators.
    System,
    /// A caller identified by an API key.
    ApiKey { key_id: String },
    /// A caller without credentials.
    Anonymous,
    /// Principal used by test suites; routed to the `test` datasets.
    Test,
    /// A caller acting inside a registered application (tenant).
    Application { label: String },
}

impl Principal {
    /// Scope label requests of this principal resolve to when none is given.
    pub fn default_scope(&self) -> &str {
        match self {
            Principal::Test => TenantScope::TEST,
            Principal::Application { label } => label,
            Principal::System | Principal::ApiKey { .. } | Principal::Anonymous => {
                TenantScope::DEFAULT
            }
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::System => f.write_str("system principal"),
            Principal::ApiKey { key_id } => write!(f, "api key '{key_id}'"),
            Principal::Anonymous => f.write_str("anonymous principal"),
            Principal::Test => f.write_str("test principal"),
            Principal::Application { label } => write!(f, "application '{label}'"),
        }
    }
}

/// An authenticated (or not) principal and its granted authorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    principal: Principal,
    authenticated: bool,
    authorities: BTreeSet<Authority>,
}

impl Authentication {
    pub fn new(principal: Principal, authorities: impl IntoIterator<Item = Authority>) -> Self {
        Self {
            principal,
            authenticated: true,
            authorities: authorities.into_iter().collect(),
        }
    }

    pub fn system() -> Self {
        Self::new(Principal::System, [Authority::System])
    }

    /// Anonymous callers may only read.
    pub fn anonymous() -> Self {
        Self::new(Principal::Anonymous, [Authority::Reader])
    }

    pub fn test() -> Self {
        Self::new(Principal::Test, [Authority::System])
    }

    pub fn api_key(key_id: impl Into<String>, authorities: impl IntoIterator<Item = Authority>) -> Self {
        Self::new(
            Principal::ApiKey {
                key_id: key_id.into(),
            },
            authorities,
        )
    }

    pub fn application(label: impl Into<String>, authorities: impl IntoIterator<Item = Authority>) -> Self {
        Self::new(
            Principal::Application {
                label: label.into(),
            },
            authorities,
        )
    }

    /// Same principal, flagged as not (or no longer) authenticated.
    pub fn revoked(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn authorities(&self) -> &BTreeSet<Authority> {
        &self.authorities
    }

    pub fn satisfies(&self, required: Authority) -> bool {
        required.satisfied_by(&self.authorities)
    }
}

/// Checks a caller's authorities against an operation's requirement.
///
/// Runs before any connection is acquired; a failed check never touches storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorityGate;

impl AuthorityGate {
    pub fn check(required: Authority, auth: &Authentication, kind: RepositoryKind) -> RepoResult<()> {
        if auth.satisfies(required) {
            return Ok(());
        }
        let granted = auth
            .authorities()
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(RepoError::InsufficientAuthority {
            required,
            kind,
            granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Authority; 4] = [
        Authority::Reader,
        Authority::Contributor,
        Authority::Application,
        Authority::System,
    ];

    #[test]
    fn ordering_is_monotone() {
        // Whatever satisfies a requirement, every higher authority satisfies too.
        for (i, granted) in ALL.iter().enumerate() {
            for required in ALL {
                if required.satisfied_by([granted]) {
                    for higher in &ALL[i..] {
                        assert!(required.satisfied_by([higher]), "{higher} should satisfy {required}");
                    }
                }
            }
        }
    }

    #[test]
    fn lower_authority_fails_gate() {
        let reader = Authentication::api_key("k1", [Authority::Reader]);
        let err = AuthorityGate::check(Authority::Contributor, &reader, RepositoryKind::Entities)
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::InsufficientAuthority {
                required: Authority::Contributor,
                ..
            }
        ));
        assert!(err.is_client_error());
    }

    #[test]
    fn any_granted_authority_may_satisfy() {
        let auth = Authentication::api_key("k2", [Authority::Reader, Authority::Application]);
        assert!(AuthorityGate::check(Authority::Contributor, &auth, RepositoryKind::Schema).is_ok());
    }

    #[test]
    fn no_authorities_satisfy_nothing() {
        let auth = Authentication::api_key("k3", []);
        assert!(!auth.satisfies(Authority::Reader));
    }

    #[test]
    fn authority_parses() {
        assert_eq!("contributor".parse::<Authority>().unwrap(), Authority::Contributor);
        assert!("admin".parse::<Authority>().is_err());
    }

    #[test]
    fn default_scopes() {
        assert_eq!(Authentication::test().principal().default_scope(), "test");
        assert_eq!(Authentication::anonymous().principal().default_scope(), "default");
        assert_eq!(
            Authentication::application("shop", [Authority::Application])
                .principal()
                .default_scope(),
            "shop"
        );
    }
}
