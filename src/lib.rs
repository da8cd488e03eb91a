// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kg-repo
//!
//! Multi-tenant, transactional access layer over RDF quad stores.
//!
//! ## Architecture
//!
//! - **Request context** (`context`, `auth`): who is asking, for which tenant scope,
//!   with which authorities
//! - **Storage** (`store`): backend trait, Oxigraph backend, bounded connections
//! - **Handle cache** (`builder`): one repository per kind and scope, idle expiry
//! - **Transactions** (`transaction`): staged inserts and removals, lifecycle, records
//! - **Operations** (`ops`): gated query, construct, commit, import and reset with
//!   lock retry
//! - **Entities and values** (`entities`, `values`): entity reads and value-level
//!   updates publishing `events`
//!
//! ## Library usage
//!
//! ```no_run
//! # async fn demo() -> kg_repo::error::RepoResult<()> {
//! use kg_repo::auth::Authority;
//! use kg_repo::config::StorageConfig;
//! use kg_repo::context::{RepositoryKind, RequestContext};
//! use kg_repo::ops::RepositoryOperations;
//! use kg_repo::transaction::Transaction;
//! use oxigraph::model::NamedNode;
//!
//! let ops = RepositoryOperations::from_config(StorageConfig::default());
//! let ctx = RequestContext::system();
//! let video = NamedNode::new_unchecked("http://example.org/a");
//! let class = NamedNode::new_unchecked("http://example.org/Video");
//!
//! let trx = ops.add_statement(video, kg_repo::model::vocab::RDF_TYPE, class, Transaction::new())?;
//! let trx = ops
//!     .commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
//!     .await?;
//! println!("{}", trx.status());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod builder;
pub mod codec;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod events;
pub mod model;
pub mod ops;
pub mod store;
pub mod transaction;
pub mod values;

pub use builder::RepositoryBuilder;
pub use context::{RepositoryKind, RequestContext};
pub use error::{RepoError, RepoResult};
pub use ops::RepositoryOperations;
pub use transaction::{Transaction, TransactionStatus};
