//! The repository operation engine.
//!
//! Every operation follows the same path:
//!
//! 1. the [`AuthorityGate`] checks the caller against the required authority,
//! 2. the [`RepositoryBuilder`] resolves the repository of the request scope,
//! 3. a [`Connection`] is acquired, retrying lock contention with backoff,
//! 4. the storage work runs on the blocking pool and the connection is released
//!    on every exit path, including cancellation of the caller's future.
//!
//! Mutations either stage into a [`Transaction`] (no storage access) and are
//! finalised by [`RepositoryOperations::commit`], or write directly through
//! [`insert`](RepositoryOperations::insert), [`delete`](RepositoryOperations::delete)
//! and [`import_statements`](RepositoryOperations::import_statements).

pub mod retry;

use std::io;
use std::sync::Arc;

use futures_util::Stream;
use oxigraph::model::{GraphName, Literal, NamedNode, NamedOrBlankNode, Quad, Term};
use tracing::{debug, error, warn};

use crate::auth::{Authority, AuthorityGate};
use crate::builder::RepositoryBuilder;
use crate::codec::{ChannelReader, CodecRegistry};
use crate::config::StorageConfig;
use crate::context::{RepositoryKind, RequestContext};
use crate::error::{RepoError, RepoResult};
use crate::events::{EventBus, RepositoryEvent};
use crate::model::vocab::extract_prefixes;
use crate::model::{AnnotatedStatement, BindingSet, Model, StatementPattern};
use crate::store::{ChangeSet, Connection, QueryOutcome, RepositoryHandle};
use crate::transaction::Transaction;

pub use self::retry::RetryPolicy;

/// Runs queries and mutations against resolved repositories.
#[derive(Debug, Clone)]
pub struct RepositoryOperations {
    builder: Arc<RepositoryBuilder>,
    codecs: CodecRegistry,
    retry: RetryPolicy,
    events: EventBus,
    import_buffer_chunks: usize,
}

impl RepositoryOperations {
    pub fn new(builder: Arc<RepositoryBuilder>) -> Self {
        let config = builder.config();
        let retry = RetryPolicy::from_config(&config.retry);
        let import_buffer_chunks = config.import_buffer_chunks;
        Self {
            builder,
            codecs: CodecRegistry::new(),
            retry,
            events: EventBus::default(),
            import_buffer_chunks,
        }
    }

    /// Engine over a fresh builder for `config`.
    pub fn from_config(config: StorageConfig) -> Self {
        Self::new(Arc::new(RepositoryBuilder::new(config)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn builder(&self) -> &Arc<RepositoryBuilder> {
        &self.builder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    // -----------------------------------------------------------------------
    // Connection scoping
    // -----------------------------------------------------------------------

    /// Gate, resolve and acquire a connection.
    async fn connect(
        &self,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<(Arc<RepositoryHandle>, Connection)> {
        let auth = ctx.require_authenticated()?;
        AuthorityGate::check(required, auth, kind)?;

        // Resolution may open a persistent store, which touches the disk.
        let builder = Arc::clone(&self.builder);
        let resolve_ctx = ctx.clone();
        let handle = tokio::task::spawn_blocking(move || builder.resolve(kind, &resolve_ctx))
            .await
            .map_err(|e| RepoError::Storage {
                label: kind.to_string(),
                message: format!("repository resolution task failed: {e}"),
            })??;

        let connection = self
            .retry
            .retry_locked(handle.label(), || handle.connection())
            .await?;
        Ok((handle, connection))
    }

    /// Run `work` on the blocking pool. The connection is rolled back on error
    /// and dropped when `work` returns.
    async fn run<T, F>(&self, handle: &RepositoryHandle, mut connection: Connection, work: F) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RepoResult<T> + Send + 'static,
    {
        let label = handle.label().to_string();
        let result = tokio::task::spawn_blocking(move || {
            let result = work(&mut connection);
            if result.is_err() {
                connection.rollback();
            }
            result
        })
        .await
        .map_err(|e| RepoError::Storage {
            label: label.clone(),
            message: format!("storage task failed: {e}"),
        })?;

        if let Err(e) = &result {
            if e.is_client_error() {
                warn!(label = %label, kind = %handle.kind(), error = %e, "repository operation rejected");
            } else {
                error!(label = %label, kind = %handle.kind(), error = ?e, "repository operation failed");
            }
        }
        result
    }

    /// Run arbitrary storage work against a repository under the standard
    /// gate / resolve / acquire / release discipline.
    pub async fn execute<T, F>(
        &self,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
        work: F,
    ) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RepoResult<T> + Send + 'static,
    {
        let (handle, connection) = self.connect(kind, ctx, required).await?;
        self.run(&handle, connection, work).await
    }

    // -----------------------------------------------------------------------
    // Query path
    // -----------------------------------------------------------------------

    /// Evaluate a SELECT or ASK query. ASK results come back as one row binding
    /// `result` to a boolean literal.
    pub async fn query(
        &self,
        sparql: &str,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<Vec<BindingSet>> {
        let sparql = sparql.to_string();
        self.execute(kind, ctx, required, move |conn| match conn.query(&sparql)? {
            QueryOutcome::Bindings { rows, .. } => Ok(rows),
            QueryOutcome::Boolean(b) => {
                let mut row = BindingSet::new();
                row.bind("result", Literal::from(b).into());
                Ok(vec![row])
            }
            QueryOutcome::Graph(_) => Err(RepoError::QuerySyntax {
                message: "expected a SELECT or ASK query, use construct for graph queries".into(),
            }),
        })
        .await
    }

    /// Evaluate a CONSTRUCT or DESCRIBE query. Each statement carries the
    /// `PREFIX` declarations of the query.
    pub async fn construct(
        &self,
        sparql: &str,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<Vec<AnnotatedStatement>> {
        let sparql = sparql.to_string();
        self.execute(kind, ctx, required, move |conn| match conn.query(&sparql)? {
            QueryOutcome::Graph(triples) => {
                let namespaces = Arc::new(extract_prefixes(&sparql));
                Ok(triples
                    .into_iter()
                    .map(|t| AnnotatedStatement::new(t, Arc::clone(&namespaces)))
                    .collect())
            }
            _ => Err(RepoError::QuerySyntax {
                message: "expected a CONSTRUCT or DESCRIBE query".into(),
            }),
        })
        .await
    }

    /// All statements matching `pattern`.
    pub async fn statements(
        &self,
        pattern: StatementPattern,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<Model> {
        self.execute(kind, ctx, required, move |conn| conn.statements(&pattern))
            .await
    }

    /// Whether any statement matches `pattern`.
    pub async fn has_statement(
        &self,
        pattern: StatementPattern,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<bool> {
        let found = self.statements(pattern, kind, ctx, required).await?;
        Ok(!found.is_empty())
    }

    /// Number of statements in the repository.
    pub async fn size(&self, kind: RepositoryKind, ctx: &RequestContext, required: Authority) -> RepoResult<usize> {
        self.execute(kind, ctx, required, |conn| conn.len()).await
    }

    // -----------------------------------------------------------------------
    // Staging (no storage access)
    // -----------------------------------------------------------------------

    /// Stage `model` for insertion.
    pub fn stage_insert(&self, model: &Model, mut trx: Transaction) -> RepoResult<Transaction> {
        trx.insert(model)?;
        Ok(trx)
    }

    /// Stage `model` for removal.
    pub fn stage_removal(&self, model: &Model, mut trx: Transaction) -> RepoResult<Transaction> {
        trx.remove(model)?;
        Ok(trx)
    }

    /// Stage one statement in the default graph for insertion.
    pub fn add_statement(
        &self,
        subject: impl Into<NamedOrBlankNode>,
        predicate: impl Into<NamedNode>,
        value: impl Into<Term>,
        mut trx: Transaction,
    ) -> RepoResult<Transaction> {
        trx.insert_statement(Quad::new(subject, predicate, value, GraphName::DefaultGraph))?;
        Ok(trx)
    }

    /// Stage one statement in the default graph for removal.
    pub fn remove_statement(
        &self,
        subject: impl Into<NamedOrBlankNode>,
        predicate: impl Into<NamedNode>,
        value: impl Into<Term>,
        mut trx: Transaction,
    ) -> RepoResult<Transaction> {
        trx.remove_statement(Quad::new(subject, predicate, value, GraphName::DefaultGraph))?;
        Ok(trx)
    }

    // -----------------------------------------------------------------------
    // Mutation path
    // -----------------------------------------------------------------------

    /// Apply every staged insert and removal of `trx` in one storage
    /// transaction.
    ///
    /// On success the transaction comes back `COMPLETED`. On failure nothing
    /// was applied, and the error is a `TransactionFailed` carrying the
    /// transaction, now `FAILED` with its staged content intact.
    pub async fn commit(
        &self,
        mut trx: Transaction,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<Transaction> {
        trx.ensure_running()?;
        let changes = trx.change_set();
        let result = self
            .execute(kind, ctx, required, move |conn| apply_atomically(conn, changes))
            .await;

        match result {
            Ok(()) => {
                trx.complete()?;
                debug!(
                    trx = %trx.id(),
                    kind = %kind,
                    inserted = trx.inserts().len(),
                    removed = trx.removals().len(),
                    "transaction committed"
                );
                Ok(trx)
            }
            Err(source) => {
                let reason = source.to_string();
                trx.fail(reason.clone())?;
                Err(RepoError::TransactionFailed {
                    id: trx.id().as_str().to_string(),
                    reason,
                    transaction: Box::new(trx),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Commit several transactions over one connection, each in its own storage
    /// transaction. A failing transaction is marked `FAILED` and the rest still
    /// commit. Sealed transactions are skipped.
    ///
    /// Returns the number of transactions completed. If the repository cannot be
    /// reached at all, every running transaction is marked `FAILED` and the
    /// error is returned.
    pub async fn commit_all(
        &self,
        transactions: &mut [Transaction],
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<usize> {
        let plans: Vec<Option<ChangeSet>> = transactions
            .iter()
            .map(|t| t.is_running().then(|| t.change_set()))
            .collect();

        let outcomes = self
            .execute(kind, ctx, required, move |conn| {
                Ok(plans
                    .into_iter()
                    .map(|plan| plan.map(|changes| apply_atomically(conn, changes).map_err(|e| e.to_string())))
                    .collect::<Vec<_>>())
            })
            .await;

        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let reason = e.to_string();
                for trx in transactions.iter_mut().filter(|t| t.is_running()) {
                    trx.fail(reason.clone())?;
                }
                return Err(e);
            }
        };

        let mut completed = 0;
        for (trx, outcome) in transactions.iter_mut().zip(outcomes) {
            match outcome {
                Some(Ok(())) => {
                    trx.complete()?;
                    completed += 1;
                }
                Some(Err(reason)) => {
                    warn!(trx = %trx.id(), kind = %kind, reason = %reason, "transaction failed");
                    trx.fail(reason)?;
                }
                None => debug!(trx = %trx.id(), status = %trx.status(), "skipped sealed transaction"),
            }
        }
        Ok(completed)
    }

    /// Insert `model` directly, across its provenance graphs, in one storage
    /// transaction. Returns the number of statements written.
    pub async fn insert(
        &self,
        model: Model,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<usize> {
        let count = model.len();
        self.execute(kind, ctx, required, move |conn| {
            conn.begin()?;
            conn.add_all(model)?;
            conn.commit()
        })
        .await?;
        debug!(kind = %kind, count, "statements inserted");
        Ok(count)
    }

    /// Remove the statements of `model` directly, in one storage transaction.
    pub async fn delete(
        &self,
        model: Model,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<usize> {
        let count = model.len();
        self.execute(kind, ctx, required, move |conn| {
            conn.begin()?;
            conn.remove_all(model)?;
            conn.commit()
        })
        .await?;
        debug!(kind = %kind, count, "statements deleted");
        Ok(count)
    }

    /// Parse a byte stream of `mime` content and insert every statement in one
    /// storage transaction. Either the whole input is imported or nothing is.
    ///
    /// An unknown media type fails with `UnsupportedFormat` before the
    /// repository is touched. Returns the number of statements parsed.
    pub async fn import_statements<S>(
        &self,
        stream: S,
        mime: &str,
        kind: RepositoryKind,
        ctx: &RequestContext,
        required: Authority,
    ) -> RepoResult<usize>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        let decoder = self.codecs.decoder_for(mime)?;
        let (handle, connection) = self.connect(kind, ctx, required).await?;
        let (reader, pump) = ChannelReader::pipe(stream, self.import_buffer_chunks);

        let result = self
            .run(&handle, connection, move |conn| {
                conn.begin()?;
                let count = decoder.decode_with(reader, |statement| conn.add(statement))?;
                conn.commit()?;
                Ok(count)
            })
            .await;
        if let Err(e) = pump.await {
            warn!(label = %handle.label(), error = %e, "import stream task failed");
        }

        let count = result?;
        debug!(label = %handle.label(), format = decoder.format_name(), count, "statements imported");
        self.events.publish(RepositoryEvent::StatementsImported {
            kind,
            label: handle.label().to_string(),
            count,
        });
        Ok(count)
    }

    /// Remove every statement of the repository.
    ///
    /// Fails with `NonEmptyAfterClear` if the store still reports content
    /// afterwards. Resetting an empty repository succeeds.
    pub async fn reset(&self, kind: RepositoryKind, ctx: &RequestContext, required: Authority) -> RepoResult<()> {
        let (handle, connection) = self.connect(kind, ctx, required).await?;
        let label = handle.label().to_string();
        let check_label = label.clone();
        self.run(&handle, connection, move |conn| {
            conn.clear()?;
            let remaining = conn.len()?;
            if remaining > 0 {
                return Err(RepoError::NonEmptyAfterClear {
                    label: check_label,
                    remaining,
                });
            }
            Ok(())
        })
        .await?;
        debug!(label = %label, "repository reset");
        self.events.publish(RepositoryEvent::RepositoryReset { kind, label });
        Ok(())
    }
}

/// Begin, stage and commit one change set. The storage transaction is closed
/// on every path.
fn apply_atomically(conn: &mut Connection, changes: ChangeSet) -> RepoResult<()> {
    conn.begin()?;
    if let Err(e) = conn.stage(changes) {
        conn.rollback();
        return Err(e);
    }
    conn.commit()
}
