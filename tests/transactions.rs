//! Commit semantics of staged transactions.
//!
//! A commit applies exactly `created - deleted` to the repository, and a failed
//! commit leaves the repository as it was.

use std::path::Path;
use std::sync::Arc;

use oxigraph::model::{GraphName, Literal, NamedNode, Quad, Term};

use kg_repo::auth::Authority;
use kg_repo::builder::RepositoryBuilder;
use kg_repo::config::StorageConfig;
use kg_repo::context::{RepositoryKind, RequestContext};
use kg_repo::entities::EntityRepository;
use kg_repo::error::{BackendError, BackendResult, RepoError};
use kg_repo::model::vocab::RDF_TYPE;
use kg_repo::model::{Model, Statement, StatementPattern};
use kg_repo::ops::RepositoryOperations;
use kg_repo::store::{BackendFactory, ChangeSet, OxigraphBackend, QueryOutcome, StorageBackend};
use kg_repo::transaction::{Transaction, TransactionStatus};

fn iri(s: &str) -> NamedNode {
    NamedNode::new(format!("http://example.org/{s}")).unwrap()
}

fn quad(s: &str, p: &str, o: &str) -> Statement {
    Quad::new(iri(s), iri(p), iri(o), GraphName::DefaultGraph)
}

/// Backend that refuses any change set inserting a `poison` predicate.
#[derive(Debug)]
struct PoisonBackend {
    inner: OxigraphBackend,
}

impl StorageBackend for PoisonBackend {
    fn name(&self) -> &'static str {
        "poison"
    }

    fn location(&self) -> Option<&Path> {
        self.inner.location()
    }

    fn query(&self, sparql: &str) -> BackendResult<QueryOutcome> {
        self.inner.query(sparql)
    }

    fn statements(&self, pattern: &StatementPattern) -> BackendResult<Model> {
        self.inner.statements(pattern)
    }

    fn contains(&self, statement: &Statement) -> BackendResult<bool> {
        self.inner.contains(statement)
    }

    fn apply(&self, changes: &ChangeSet) -> BackendResult<()> {
        let poison = iri("poison");
        if changes.inserts().iter().any(|q| q.predicate == poison) {
            return Err(BackendError::Storage {
                message: "disk full".into(),
            });
        }
        self.inner.apply(changes)
    }

    fn clear(&self) -> BackendResult<()> {
        self.inner.clear()
    }

    fn len(&self) -> BackendResult<usize> {
        self.inner.len()
    }
}

#[derive(Debug)]
struct PoisonFactory;

impl BackendFactory for PoisonFactory {
    fn backend_name(&self) -> &'static str {
        "poison"
    }

    fn open_volatile(&self) -> BackendResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(PoisonBackend {
            inner: OxigraphBackend::in_memory()?,
        }))
    }

    fn open_persistent(&self, path: &Path) -> BackendResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(PoisonBackend {
            inner: OxigraphBackend::open(path)?,
        }))
    }
}

fn poisoned_ops() -> RepositoryOperations {
    let builder = RepositoryBuilder::with_factory(StorageConfig::default(), Arc::new(PoisonFactory));
    RepositoryOperations::new(Arc::new(builder))
}

async fn contents(ops: &RepositoryOperations, ctx: &RequestContext) -> Model {
    ops.statements(StatementPattern::any(), RepositoryKind::Entities, ctx, Authority::Reader)
        .await
        .unwrap()
}

#[tokio::test]
async fn committed_type_is_visible() {
    let ops = RepositoryOperations::from_config(StorageConfig::default());
    let ctx = RequestContext::test();

    let trx = ops
        .add_statement(iri("a"), RDF_TYPE, iri("Video"), Transaction::new())
        .unwrap();
    let trx = ops
        .commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();
    assert_eq!(trx.status(), &TransactionStatus::Completed);
    assert!(trx.completed_at().is_some());

    let entities = EntityRepository::new(ops);
    let subject = iri("a").into();
    assert!(entities.exists(&subject, &ctx).await.unwrap());
    assert_eq!(entities.types(&subject, &ctx).await.unwrap(), vec![iri("Video")]);
}

#[tokio::test]
async fn commit_applies_created_minus_deleted() {
    let ops = RepositoryOperations::from_config(StorageConfig::default());
    let ctx = RequestContext::test();
    let seed: Model = [quad("a", "p", "b"), quad("a", "p", "keep")].into_iter().collect();
    ops.insert(seed, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();

    let mut trx = Transaction::new();
    trx.insert_statement(quad("a", "p", "c")).unwrap();
    trx.remove_statement(quad("a", "p", "b")).unwrap();
    // staged then withdrawn: the later removal wins
    trx.insert_statement(quad("a", "p", "d")).unwrap();
    trx.remove_statement(quad("a", "p", "d")).unwrap();

    ops.commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();

    let expected: Model = [quad("a", "p", "c"), quad("a", "p", "keep")].into_iter().collect();
    assert_eq!(contents(&ops, &ctx).await, expected);
}

#[tokio::test]
async fn failed_commit_leaves_repository_unchanged() {
    let ops = poisoned_ops();
    let ctx = RequestContext::test();
    let seed: Model = [quad("a", "p", "b")].into_iter().collect();
    ops.insert(seed.clone(), RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();

    let mut trx = Transaction::new();
    trx.remove_statement(quad("a", "p", "b")).unwrap();
    trx.insert_statement(quad("a", "poison", "x")).unwrap();

    let err = ops
        .commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::TransactionFailed { .. }));
    assert!(matches!(err.root_cause(), RepoError::Storage { .. }));
    assert!(!err.is_client_error());

    let failed = err.failed_transaction().unwrap();
    assert!(matches!(failed.status(), TransactionStatus::Failed { .. }));
    // staged content survives for inspection
    assert_eq!(failed.inserts().len(), 1);
    assert_eq!(failed.removals().len(), 1);

    assert_eq!(contents(&ops, &ctx).await, seed);
}

#[tokio::test]
async fn commit_all_isolates_failures() {
    let ops = poisoned_ops();
    let ctx = RequestContext::test();

    let mut good = Transaction::new();
    good.insert_statement(quad("a", "p", "b")).unwrap();
    let mut bad = Transaction::new();
    bad.insert_statement(quad("a", "poison", "x")).unwrap();
    let mut sealed = Transaction::new();
    sealed.fail("abandoned").unwrap();

    let mut batch = vec![good, bad, sealed];
    let completed = ops
        .commit_all(&mut batch, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();
    assert_eq!(completed, 1);
    assert_eq!(batch[0].status(), &TransactionStatus::Completed);
    assert!(matches!(batch[1].status(), TransactionStatus::Failed { .. }));
    assert_eq!(
        batch[2].status(),
        &TransactionStatus::Failed {
            reason: "abandoned".into()
        }
    );

    let expected: Model = [quad("a", "p", "b")].into_iter().collect();
    assert_eq!(contents(&ops, &ctx).await, expected);
}

#[tokio::test]
async fn commit_needs_contributor() {
    let ops = RepositoryOperations::from_config(StorageConfig::default());
    let ctx = RequestContext::anonymous();
    let trx = ops
        .add_statement(iri("a"), RDF_TYPE, iri("Video"), Transaction::new())
        .unwrap();
    let err = ops
        .commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), RepoError::InsufficientAuthority { .. }));
    let failed = err.failed_transaction().unwrap();
    assert!(!failed.is_running());
}

#[tokio::test]
async fn archived_records_are_queryable() {
    let ops = RepositoryOperations::from_config(StorageConfig::default());
    let ctx = RequestContext::test();
    let trx = ops
        .add_statement(iri("a"), RDF_TYPE, iri("Video"), Transaction::new())
        .unwrap();
    let trx = ops
        .commit(trx, RepositoryKind::Entities, &ctx, Authority::Contributor)
        .await
        .unwrap();

    let entities = EntityRepository::new(ops.clone());
    assert_eq!(entities.archive(&[trx.clone()], &ctx).await.unwrap(), 1);

    let sparql = format!(
        "ASK {{ <{}> a <http://w3id.org/kgrepo/trx#Transaction> ; <http://w3id.org/kgrepo/trx#affects> <http://example.org/a> }}",
        trx.id().as_str()
    );
    let rows = ops
        .query(&sparql, RepositoryKind::Transactions, &ctx, Authority::Reader)
        .await
        .unwrap();
    assert_eq!(rows[0].get("result"), Some(&Term::from(Literal::from(true))));
}
