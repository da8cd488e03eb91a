//! Rich diagnostic error types for the repository access layer.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`RepoError`] is the taxonomy callers see:
//! every variant is either a client error (the request was wrong) or a server
//! error (the storage layer failed), see [`RepoError::is_client_error`].

use miette::Diagnostic;
use thiserror::Error;

use crate::auth::Authority;
use crate::context::RepositoryKind;
use crate::transaction::Transaction;

/// Top-level error type for repository operations.
#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    #[error("authentication required: {message}")]
    #[diagnostic(
        code(kg::auth::unauthenticated),
        help(
            "Every repository operation needs an authenticated principal. \
             Attach an `Authentication` to the `RequestContext` before calling."
        )
    )]
    Authentication { message: String },

    #[error(
        "required authority '{required}' for repository '{kind}' not met in authentication with authorities '{granted}'"
    )]
    #[diagnostic(
        code(kg::auth::insufficient_authority),
        help("The caller must be granted '{required}' or a higher authority.")
    )]
    InsufficientAuthority {
        required: Authority,
        kind: RepositoryKind,
        granted: String,
    },

    #[error("invalid tenant scope label: \"{label}\"")]
    #[diagnostic(
        code(kg::context::invalid_scope),
        help("Scope labels must be non-empty and contain only ASCII letters, digits, '-' or '_'.")
    )]
    InvalidScope { label: String },

    #[error("invalid query: {message}")]
    #[diagnostic(
        code(kg::query::syntax),
        help("The SPARQL text could not be parsed, or has the wrong form for this operation.")
    )]
    QuerySyntax { message: String },

    #[error("query failed in repository '{label}': {message}")]
    #[diagnostic(
        code(kg::query::execution),
        help("The store failed while evaluating a well-formed query. Check the server logs.")
    )]
    QueryExecution { label: String, message: String },

    #[error("storage error in repository '{label}': {message}")]
    #[diagnostic(
        code(kg::store::storage),
        help(
            "The backing store rejected the operation. The storage transaction was rolled back; \
             check disk space, permissions and the server logs."
        )
    )]
    Storage { label: String, message: String },

    #[error("repository '{label}' is locked (gave up after {attempts} retries)")]
    #[diagnostic(
        code(kg::store::locked),
        help(
            "All connections of the repository are in use. Raise `max_connections` \
             in the storage configuration or reduce concurrent load."
        )
    )]
    RepositoryLocked { label: String, attempts: u32 },

    #[error("unsupported format: \"{mime}\"")]
    #[diagnostic(
        code(kg::codec::unsupported_format),
        help("Supported media types are: {supported}")
    )]
    UnsupportedFormat { mime: String, supported: String },

    #[error("repository '{label}' still holds {remaining} statements after clearing")]
    #[diagnostic(
        code(kg::store::non_empty_after_clear),
        help(
            "The backend reported success for `clear` but is not empty. \
             This indicates a corrupted store; do not keep writing to it."
        )
    )]
    NonEmptyAfterClear { label: String, remaining: usize },

    #[error("transaction {id} is {status}, expected running")]
    #[diagnostic(
        code(kg::trx::state),
        help("Completed and failed transactions are sealed. Start a new `Transaction` instead.")
    )]
    TransactionState { id: String, status: String },

    #[error("transaction {id} failed: {reason}")]
    #[diagnostic(
        code(kg::trx::failed),
        help("The staged statements are preserved in the attached transaction for inspection.")
    )]
    TransactionFailed {
        id: String,
        reason: String,
        transaction: Box<Transaction>,
        #[source]
        source: Box<RepoError>,
    },

    #[error("entity not found: {subject}")]
    #[diagnostic(
        code(kg::entity::not_found),
        help("No statements with `rdf:type` exist for this subject in the entity repository.")
    )]
    EntityNotFound { subject: String },

    #[error("invalid update of entity {subject}: {message}")]
    #[diagnostic(code(kg::entity::invalid_update))]
    InvalidEntityUpdate { subject: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl RepoError {
    /// Map a backend failure to the caller-facing taxonomy, tagging it with the
    /// repository label it happened in.
    pub fn from_backend(label: &str, err: BackendError) -> Self {
        match err {
            BackendError::Syntax { message } => RepoError::QuerySyntax { message },
            BackendError::Evaluation { message } => RepoError::QueryExecution {
                label: label.to_string(),
                message,
            },
            BackendError::Locked { .. } => RepoError::RepositoryLocked {
                label: label.to_string(),
                attempts: 0,
            },
            other => RepoError::Storage {
                label: label.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        match self {
            RepoError::InsufficientAuthority { .. }
            | RepoError::InvalidScope { .. }
            | RepoError::QuerySyntax { .. }
            | RepoError::UnsupportedFormat { .. }
            | RepoError::TransactionState { .. }
            | RepoError::EntityNotFound { .. }
            | RepoError::InvalidEntityUpdate { .. } => true,
            RepoError::TransactionFailed { source, .. } => source.is_client_error(),
            RepoError::Codec(CodecError::Parse { .. }) => true,
            _ => false,
        }
    }

    /// The failed transaction carried by a commit error, if any.
    pub fn failed_transaction(&self) -> Option<&Transaction> {
        match self {
            RepoError::TransactionFailed { transaction, .. } => Some(transaction),
            _ => None,
        }
    }

    /// Peel off a `TransactionFailed` wrapper to get at the underlying cause.
    pub fn root_cause(&self) -> &RepoError {
        match self {
            RepoError::TransactionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BackendError {
    #[error("failed to open store at {path}: {message}")]
    #[diagnostic(
        code(kg::backend::open),
        help(
            "The persistent store could not be opened. Check that the directory is writable \
             and not held by another process."
        )
    )]
    Open { path: String, message: String },

    #[error("SPARQL syntax error: {message}")]
    #[diagnostic(code(kg::backend::syntax))]
    Syntax { message: String },

    #[error("SPARQL evaluation error: {message}")]
    #[diagnostic(code(kg::backend::evaluation))]
    Evaluation { message: String },

    #[error("storage error: {message}")]
    #[diagnostic(code(kg::backend::storage))]
    Storage { message: String },

    #[error("all {limit} connections of '{label}' are in use")]
    #[diagnostic(
        code(kg::backend::locked),
        help("This condition is transient; the operation engine retries it with backoff.")
    )]
    Locked { label: String, limit: usize },

    #[error("a storage transaction is already active on this connection")]
    #[diagnostic(code(kg::backend::transaction_active))]
    TransactionActive,

    #[error("no storage transaction is active on this connection")]
    #[diagnostic(code(kg::backend::no_transaction))]
    NoTransaction,

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(kg::backend::io),
        help("A filesystem operation failed. Check the storage path and its permissions.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CodecError {
    #[error("failed to parse {format} input: {message}")]
    #[diagnostic(
        code(kg::codec::parse),
        help("The request body is not valid {format}. Nothing was imported.")
    )]
    Parse { format: String, message: String },

    #[error("failed to read import stream: {source}")]
    #[diagnostic(code(kg::codec::read))]
    Read {
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read storage config: {path}")]
    #[diagnostic(
        code(kg::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse storage config: {message}")]
    #[diagnostic(
        code(kg::config::parse),
        help("Check the TOML syntax and field names of the storage config.")
    )]
    Parse { message: String },

    #[error("invalid storage config: {message}")]
    #[diagnostic(code(kg::config::invalid))]
    Invalid { message: String },
}

/// Convenience alias for functions returning repository results.
pub type RepoResult<T> = std::result::Result<T, RepoError>;
