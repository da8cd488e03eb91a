//! Per-operation connection with an optional storage transaction.

use std::sync::Arc;

use tracing::{trace, warn};

use super::handle::ConnectionPermit;
use super::{ChangeSet, QueryOutcome, StorageBackend};
use crate::error::{BackendError, RepoError, RepoResult};
use crate::model::{Model, Statement, StatementPattern};

/// A session on a repository.
///
/// Outside a storage transaction every write is applied immediately. Between
/// [`begin`](Self::begin) and [`commit`](Self::commit) writes are buffered and
/// applied atomically at commit; [`rollback`](Self::rollback), an error, or
/// dropping the connection discards them. Dropping the connection also
/// releases its slot on the handle.
pub struct Connection {
    label: String,
    backend: Arc<dyn StorageBackend>,
    pending: Option<ChangeSet>,
    _permit: ConnectionPermit,
}

impl Connection {
    pub(crate) fn new(label: String, backend: Arc<dyn StorageBackend>, permit: ConnectionPermit) -> Self {
        Self {
            label,
            backend,
            pending: None,
            _permit: permit,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn err(&self, e: BackendError) -> RepoError {
        RepoError::from_backend(&self.label, e)
    }

    /// Whether a storage transaction is open.
    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    pub fn begin(&mut self) -> RepoResult<()> {
        if self.pending.is_some() {
            return Err(self.err(BackendError::TransactionActive));
        }
        self.pending = Some(ChangeSet::new());
        Ok(())
    }

    pub fn add(&mut self, statement: Statement) -> RepoResult<()> {
        let mut batch = ChangeSet::new();
        batch.insert(statement);
        self.stage(batch)
    }

    pub fn add_all(&mut self, statements: impl IntoIterator<Item = Statement>) -> RepoResult<()> {
        let mut batch = ChangeSet::new();
        for statement in statements {
            batch.insert(statement);
        }
        self.stage(batch)
    }

    pub fn remove(&mut self, statement: Statement) -> RepoResult<()> {
        let mut batch = ChangeSet::new();
        batch.remove(statement);
        self.stage(batch)
    }

    pub fn remove_all(&mut self, statements: impl IntoIterator<Item = Statement>) -> RepoResult<()> {
        let mut batch = ChangeSet::new();
        for statement in statements {
            batch.remove(statement);
        }
        self.stage(batch)
    }

    /// Merge a batch into the open transaction, or apply it right away.
    pub fn stage(&mut self, batch: ChangeSet) -> RepoResult<()> {
        if let Some(changes) = self.pending.as_mut() {
            for statement in batch.removals().iter().cloned() {
                changes.remove(statement);
            }
            for statement in batch.inserts().iter().cloned() {
                changes.insert(statement);
            }
            return Ok(());
        }
        self.backend.apply(&batch).map_err(|e| self.err(e))
    }

    /// Apply the buffered changes atomically and close the transaction.
    ///
    /// On failure nothing was applied and the transaction is closed.
    pub fn commit(&mut self) -> RepoResult<()> {
        let changes = self
            .pending
            .take()
            .ok_or_else(|| self.err(BackendError::NoTransaction))?;
        trace!(label = %self.label, changes = changes.len(), "committing storage transaction");
        self.backend.apply(&changes).map_err(|e| self.err(e))
    }

    /// Discard the buffered changes. A no-op without an open transaction.
    pub fn rollback(&mut self) {
        if let Some(changes) = self.pending.take() {
            trace!(label = %self.label, changes = changes.len(), "rolled back storage transaction");
        }
    }

    pub fn query(&self, sparql: &str) -> RepoResult<QueryOutcome> {
        self.backend.query(sparql).map_err(|e| self.err(e))
    }

    pub fn statements(&self, pattern: &StatementPattern) -> RepoResult<Model> {
        self.backend.statements(pattern).map_err(|e| self.err(e))
    }

    pub fn contains(&self, statement: &Statement) -> RepoResult<bool> {
        self.backend.contains(statement).map_err(|e| self.err(e))
    }

    pub fn clear(&mut self) -> RepoResult<()> {
        self.backend.clear().map_err(|e| self.err(e))
    }

    pub fn len(&self) -> RepoResult<usize> {
        self.backend.len().map_err(|e| self.err(e))
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        self.backend.is_empty().map_err(|e| self.err(e))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(changes) = self.pending.take() {
            if !changes.is_empty() {
                warn!(
                    label = %self.label,
                    changes = changes.len(),
                    "connection closed with an open transaction, changes discarded"
                );
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
