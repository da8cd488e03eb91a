//! Oxigraph-backed storage: in-memory for volatile repositories, on-disk for
//! persistent ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::oxigraph::model::Term;
use ::oxigraph::sparql::{Query, QueryResults};
use ::oxigraph::store::Store;

use super::{BackendFactory, ChangeSet, QueryOutcome, StorageBackend};
use crate::error::{BackendError, BackendResult};
use crate::model::{BindingSet, Model, Statement, StatementPattern};

/// Directory name of oxigraph stores below `{base}/{KIND}`.
pub const BACKEND_NAME: &str = "oxigraph";

fn storage_err(e: impl std::fmt::Display) -> BackendError {
    BackendError::Storage {
        message: e.to_string(),
    }
}

/// A statement store backed by an oxigraph [`Store`].
pub struct OxigraphBackend {
    store: Store,
    location: Option<PathBuf>,
}

impl OxigraphBackend {
    /// Create a new in-memory store (no persistence).
    pub fn in_memory() -> BackendResult<Self> {
        let store = Store::new().map_err(|e| BackendError::Open {
            path: "<memory>".into(),
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self {
            store,
            location: None,
        })
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &Path) -> BackendResult<Self> {
        std::fs::create_dir_all(path).map_err(|source| BackendError::Io { source })?;
        let store = Store::open(path).map_err(|e| BackendError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            store,
            location: Some(path.to_path_buf()),
        })
    }
}

impl StorageBackend for OxigraphBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn query(&self, sparql: &str) -> BackendResult<QueryOutcome> {
        // Parse up front so syntax errors stay distinguishable from evaluation errors.
        Query::parse(sparql, None).map_err(|e| BackendError::Syntax {
            message: e.to_string(),
        })?;

        let results = self.store.query(sparql).map_err(|e| BackendError::Evaluation {
            message: e.to_string(),
        })?;

        match results {
            QueryResults::Solutions(solutions) => {
                let variables: Vec<String> = solutions
                    .variables()
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect();
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| BackendError::Evaluation {
                        message: e.to_string(),
                    })?;
                    let mut row = BindingSet::new();
                    for (var, term) in solution.iter() {
                        row.bind(var.as_str(), term.clone());
                    }
                    rows.push(row);
                }
                Ok(QueryOutcome::Bindings { variables, rows })
            }
            QueryResults::Boolean(b) => Ok(QueryOutcome::Boolean(b)),
            QueryResults::Graph(triples) => {
                let triples = triples
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| BackendError::Evaluation {
                        message: e.to_string(),
                    })?;
                Ok(QueryOutcome::Graph(triples))
            }
        }
    }

    fn statements(&self, pattern: &StatementPattern) -> BackendResult<Model> {
        let object = pattern.object.as_ref().map(Term::as_ref);
        self.store
            .quads_for_pattern(
                pattern.subject.as_ref().map(|s| s.as_ref()),
                pattern.predicate.as_ref().map(|p| p.as_ref()),
                object,
                pattern.graph.as_ref().map(|g| g.as_ref()),
            )
            .collect::<Result<Model, _>>()
            .map_err(storage_err)
    }

    fn contains(&self, statement: &Statement) -> BackendResult<bool> {
        self.store.contains(statement).map_err(storage_err)
    }

    fn apply(&self, changes: &ChangeSet) -> BackendResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut transaction = self.store.start_transaction().map_err(storage_err)?;
        for statement in changes.removals() {
            transaction.remove(statement);
        }
        for statement in changes.inserts() {
            transaction.insert(statement);
        }
        // Dropping an uncommitted oxigraph transaction discards it.
        transaction.commit().map_err(storage_err)
    }

    fn clear(&self) -> BackendResult<()> {
        self.store.clear().map_err(storage_err)
    }

    fn len(&self) -> BackendResult<usize> {
        self.store.len().map_err(storage_err)
    }

    fn is_empty(&self) -> BackendResult<bool> {
        self.store.is_empty().map_err(storage_err)
    }
}

impl std::fmt::Debug for OxigraphBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OxigraphBackend")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Default [`BackendFactory`]: opens [`OxigraphBackend`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OxigraphFactory;

impl BackendFactory for OxigraphFactory {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn open_volatile(&self) -> BackendResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(OxigraphBackend::in_memory()?))
    }

    fn open_persistent(&self, path: &Path) -> BackendResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(OxigraphBackend::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::oxigraph::model::{GraphName, Literal, NamedNode, Quad};

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{s}")).unwrap()
    }

    fn quad(s: &str, o: &str) -> Statement {
        Quad::new(iri(s), iri("p"), iri(o), GraphName::DefaultGraph)
    }

    fn populated() -> OxigraphBackend {
        let backend = OxigraphBackend::in_memory().unwrap();
        let mut changes = ChangeSet::new();
        changes.insert(quad("a", "b"));
        changes.insert(quad("b", "c"));
        backend.apply(&changes).unwrap();
        backend
    }

    #[test]
    fn apply_and_count() {
        let backend = populated();
        assert_eq!(backend.len().unwrap(), 2);
        assert!(backend.contains(&quad("a", "b")).unwrap());
        assert!(backend.location().is_none());
    }

    #[test]
    fn apply_removes_and_inserts_together() {
        let backend = populated();
        let mut changes = ChangeSet::new();
        changes.remove(quad("a", "b"));
        changes.insert(quad("a", "z"));
        backend.apply(&changes).unwrap();
        assert!(!backend.contains(&quad("a", "b")).unwrap());
        assert!(backend.contains(&quad("a", "z")).unwrap());
        assert_eq!(backend.len().unwrap(), 2);
    }

    #[test]
    fn select_query() {
        let backend = populated();
        let outcome = backend
            .query("SELECT ?o WHERE { <http://example.org/a> ?p ?o }")
            .unwrap();
        match outcome {
            QueryOutcome::Bindings { variables, rows } => {
                assert_eq!(variables, vec!["o".to_string()]);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].get("o"), Some(&Term::from(iri("b"))));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn ask_and_construct() {
        let backend = populated();
        assert_eq!(
            backend.query("ASK { ?s ?p <http://example.org/c> }").unwrap(),
            QueryOutcome::Boolean(true)
        );
        match backend.query("CONSTRUCT WHERE { ?s ?p ?o }").unwrap() {
            QueryOutcome::Graph(triples) => assert_eq!(triples.len(), 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn malformed_query_is_syntax_error() {
        let backend = populated();
        let err = backend.query("SELEKT nothing").unwrap_err();
        assert!(matches!(err, BackendError::Syntax { .. }));
    }

    #[test]
    fn pattern_lookup() {
        let backend = populated();
        let mut changes = ChangeSet::new();
        changes.insert(Quad::new(
            iri("a"),
            iri("label"),
            Literal::new_simple_literal("A"),
            GraphName::DefaultGraph,
        ));
        backend.apply(&changes).unwrap();

        let found = backend.statements(&StatementPattern::subject(iri("a"))).unwrap();
        assert_eq!(found.len(), 2);
        let found = backend
            .statements(&StatementPattern::any().with_object(iri("c")))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn clear_empties_store() {
        let backend = populated();
        backend.clear().unwrap();
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn persistent_store_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ENTITIES").join(BACKEND_NAME);
        {
            let backend = OxigraphBackend::open(&path).unwrap();
            let mut changes = ChangeSet::new();
            changes.insert(quad("a", "b"));
            backend.apply(&changes).unwrap();
            assert_eq!(backend.location(), Some(path.as_path()));
        }
        let backend = OxigraphBackend::open(&path).unwrap();
        assert!(backend.contains(&quad("a", "b")).unwrap());
    }

    #[test]
    fn unusable_directory_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();
        let err = OxigraphBackend::open(&file.join(BACKEND_NAME)).unwrap_err();
        assert!(matches!(err, BackendError::Io { .. }), "got {err:?}");
    }
}
