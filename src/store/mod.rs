//! Storage layer: the backend capability trait and the handles built on it.
//!
//! - [`StorageBackend`]: one capability interface over a statement store
//!   (query, pattern lookup, atomic change application, clear, size).
//! - [`OxigraphBackend`]: the volatile (`Store::new`) and persistent
//!   (`Store::open`) implementation.
//! - [`RepositoryHandle`]: a labelled, shared backend that hands out a bounded
//!   number of [`Connection`]s.
//! - [`Connection`]: a per-operation session carrying an optional storage
//!   transaction (begin / add / remove / commit / rollback).

pub mod connection;
pub mod handle;
pub mod oxigraph;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ::oxigraph::model::Triple;

use crate::error::BackendResult;
use crate::model::{BindingSet, Model, Statement, StatementPattern};

pub use self::connection::Connection;
pub use self::handle::RepositoryHandle;
pub use self::oxigraph::{OxigraphBackend, OxigraphFactory};

/// Fully evaluated result of a SPARQL query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// SELECT results: projected variable names and one row per solution.
    Bindings {
        variables: Vec<String>,
        rows: Vec<BindingSet>,
    },
    /// ASK result.
    Boolean(bool),
    /// CONSTRUCT / DESCRIBE results.
    Graph(Vec<Triple>),
}

/// Statements to insert and remove in one atomic step.
///
/// The two sets are kept disjoint: staging a statement on one side withdraws it
/// from the other, so the last staged operation on a statement wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    inserts: Model,
    removals: Model,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, statement: Statement) {
        self.removals.remove(&statement);
        self.inserts.insert(statement);
    }

    pub fn remove(&mut self, statement: Statement) {
        self.inserts.remove(&statement);
        self.removals.insert(statement);
    }

    pub fn inserts(&self) -> &Model {
        &self.inserts
    }

    pub fn removals(&self) -> &Model {
        &self.removals
    }

    /// Total number of staged changes.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removals.is_empty()
    }
}

/// Capability interface of a statement store.
///
/// Implementations must be safe to share between threads: one backend serves
/// every connection of its handle.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short name of the backend, used as its directory name on disk.
    fn name(&self) -> &'static str;

    /// Directory of a persistent backend, `None` for a volatile one.
    fn location(&self) -> Option<&Path>;

    /// Parse and evaluate a SPARQL query. Malformed text fails with
    /// `BackendError::Syntax`, evaluation problems with `BackendError::Evaluation`.
    fn query(&self, sparql: &str) -> BackendResult<QueryOutcome>;

    /// All statements matching the pattern, across graphs.
    fn statements(&self, pattern: &StatementPattern) -> BackendResult<Model>;

    fn contains(&self, statement: &Statement) -> BackendResult<bool>;

    /// Apply removals and inserts atomically: either every change becomes
    /// visible or none does.
    fn apply(&self, changes: &ChangeSet) -> BackendResult<()>;

    fn clear(&self) -> BackendResult<()>;

    /// Number of statements across all graphs.
    fn len(&self) -> BackendResult<usize>;

    fn is_empty(&self) -> BackendResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Opens backends for the repository builder.
pub trait BackendFactory: Send + Sync + fmt::Debug {
    /// Directory name persistent stores of this factory live in.
    fn backend_name(&self) -> &'static str;

    fn open_volatile(&self) -> BackendResult<Arc<dyn StorageBackend>>;

    /// Open (or create) a persistent store in `path`.
    fn open_persistent(&self, path: &Path) -> BackendResult<Arc<dyn StorageBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::oxigraph::model::{GraphName, NamedNode, Quad};

    fn quad(s: &str) -> Statement {
        let n = |v: &str| NamedNode::new(format!("http://example.org/{v}")).unwrap();
        Quad::new(n(s), n("p"), n("o"), GraphName::DefaultGraph)
    }

    #[test]
    fn last_staged_change_wins() {
        let mut changes = ChangeSet::new();
        changes.insert(quad("a"));
        changes.remove(quad("a"));
        assert!(changes.inserts().is_empty());
        assert!(changes.removals().contains(&quad("a")));

        changes.insert(quad("a"));
        assert!(changes.removals().is_empty());
        assert_eq!(changes.len(), 1);
    }
}
