//! Labelled repository handles and their connection limit.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use super::{Connection, StorageBackend};
use crate::context::RepositoryKind;
use crate::error::{BackendError, BackendResult};

/// A named, shared storage endpoint.
///
/// One handle exists per label; every operation opens its own [`Connection`]
/// from it. At most `max_connections` connections are open at a time, further
/// requests fail with [`BackendError::Locked`].
pub struct RepositoryHandle {
    label: String,
    kind: RepositoryKind,
    scope: String,
    backend: Arc<dyn StorageBackend>,
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

impl RepositoryHandle {
    pub fn new(
        label: impl Into<String>,
        kind: RepositoryKind,
        scope: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        max_connections: usize,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            scope: scope.into(),
            backend,
            active: Arc::new(AtomicUsize::new(0)),
            max_connections: max_connections.max(1),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Open a connection, or fail with `Locked` if the limit is reached.
    pub fn connection(&self) -> BackendResult<Connection> {
        let acquired = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            });
        match acquired {
            Ok(previous) => {
                trace!(label = %self.label, open = previous + 1, "connection opened");
                let permit = ConnectionPermit {
                    active: Arc::clone(&self.active),
                };
                Ok(Connection::new(
                    self.label.clone(),
                    Arc::clone(&self.backend),
                    permit,
                ))
            }
            Err(_) => Err(BackendError::Locked {
                label: self.label.clone(),
                limit: self.max_connections,
            }),
        }
    }

    /// Number of connections currently open on this handle.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.location().is_some()
    }

    pub fn location(&self) -> Option<&Path> {
        self.backend.location()
    }
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("label", &self.label)
            .field("backend", &self.backend.name())
            .field("location", &self.backend.location())
            .field("active", &self.active_connections())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Releases one connection slot of its handle when dropped.
pub(crate) struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
