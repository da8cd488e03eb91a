//! Repository resolution and the handle cache.
//!
//! [`RepositoryBuilder::resolve`] maps a (kind, request context) pair to a
//! shared [`RepositoryHandle`]. Handles are cached by label
//! (`{KIND}_{scope}`); a cached handle idle for longer than the configured TTL
//! is re-created on its next resolution, unless someone still holds it.
//!
//! Persistent layout, per configured base path:
//!
//! ```text
//! {base}/{KIND}/{backend}                   default scope
//! {base}/{KIND}/tenants/{scope}/{backend}   every other scope
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace, warn};

use crate::config::StorageConfig;
use crate::context::{RepositoryKind, RequestContext, TenantScope};
use crate::error::{RepoError, RepoResult};
use crate::store::{BackendFactory, OxigraphFactory, RepositoryHandle, StorageBackend};

struct CacheEntry {
    handle: Arc<RepositoryHandle>,
    last_access_ms: AtomicU64,
}

impl CacheEntry {
    fn new(handle: Arc<RepositoryHandle>, now_ms: u64) -> Self {
        Self {
            handle,
            last_access_ms: AtomicU64::new(now_ms),
        }
    }

    fn touch(&self, now_ms: u64) {
        self.last_access_ms.store(now_ms, Ordering::Release);
    }

    fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_access_ms.load(Ordering::Acquire)) >= ttl_ms
    }

    /// Only the cache holds the handle and no connection is open.
    fn is_unused(&self) -> bool {
        Arc::strong_count(&self.handle) == 1 && self.handle.active_connections() == 0
    }
}

/// Resolves repositories and owns the handle cache.
pub struct RepositoryBuilder {
    config: StorageConfig,
    factory: Arc<dyn BackendFactory>,
    cache: DashMap<String, CacheEntry>,
    epoch: Instant,
}

impl RepositoryBuilder {
    /// Builder opening oxigraph stores.
    pub fn new(config: StorageConfig) -> Self {
        Self::with_factory(config, Arc::new(OxigraphFactory))
    }

    pub fn with_factory(config: StorageConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            config,
            factory,
            cache: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Cache key of a repository.
    pub fn label(kind: RepositoryKind, scope: &str) -> String {
        format!("{kind}_{scope}")
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn ttl_ms(&self) -> u64 {
        self.config.idle_ttl().as_millis() as u64
    }

    /// Resolve the repository of `kind` for the scope of `ctx`.
    ///
    /// Fails with `Authentication` if the context carries no authenticated
    /// principal. Concurrent first resolutions of one label open exactly one
    /// backend.
    pub fn resolve(&self, kind: RepositoryKind, ctx: &RequestContext) -> RepoResult<Arc<RepositoryHandle>> {
        ctx.require_authenticated()?;
        let scope = TenantScope::new(ctx.effective_scope()?)?;
        let label = Self::label(kind, scope.as_str());
        let now = self.now_ms();
        let ttl = self.ttl_ms();

        if let Some(entry) = self.cache.get(&label) {
            if !entry.is_expired(now, ttl) || !entry.is_unused() {
                entry.touch(now);
                trace!(label = %label, "repository cache hit");
                return Ok(Arc::clone(&entry.handle));
            }
        }

        // Release an expired handle before reopening: a persistent store cannot
        // be opened twice.
        if let Some((_, expired)) = self
            .cache
            .remove_if(&label, |_, e| e.is_expired(now, ttl) && e.is_unused())
        {
            debug!(label = %label, "evicted idle repository");
            drop(expired);
        }

        match self.cache.entry(label) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                entry.touch(now);
                Ok(Arc::clone(&entry.handle))
            }
            Entry::Vacant(vacant) => {
                let handle = self.open(kind, &scope, vacant.key())?;
                vacant.insert(CacheEntry::new(Arc::clone(&handle), now));
                Ok(handle)
            }
        }
    }

    /// Directory a persistent repository lives in below `base`.
    pub fn store_path(&self, base: &Path, kind: RepositoryKind, scope: &TenantScope) -> PathBuf {
        let dir = base.join(kind.as_str());
        let dir = if scope.is_default() {
            dir
        } else {
            dir.join("tenants").join(scope.as_str())
        };
        dir.join(self.factory.backend_name())
    }

    fn open(&self, kind: RepositoryKind, scope: &TenantScope, label: &str) -> RepoResult<Arc<RepositoryHandle>> {
        let backend = match self.config.storage_path(kind) {
            Some(base) => {
                let path = self.store_path(base, kind, scope);
                match self.factory.open_persistent(&path) {
                    Ok(backend) => {
                        debug!(label, path = %path.display(), "opened persistent repository");
                        backend
                    }
                    Err(e) => {
                        warn!(
                            label,
                            path = %path.display(),
                            error = %e,
                            "failed to open persistent repository, falling back to in-memory store"
                        );
                        self.open_volatile(label)?
                    }
                }
            }
            None => self.open_volatile(label)?,
        };
        Ok(Arc::new(RepositoryHandle::new(
            label,
            kind,
            scope.as_str(),
            backend,
            self.config.max_connections,
        )))
    }

    fn open_volatile(&self, label: &str) -> RepoResult<Arc<dyn StorageBackend>> {
        let backend = self
            .factory
            .open_volatile()
            .map_err(|e| RepoError::from_backend(label, e))?;
        debug!(label, "opened in-memory repository");
        Ok(backend)
    }

    /// Drop the cached handle of a repository so the next resolution reopens it.
    ///
    /// Returns `false` if nothing was cached or the handle is still in use.
    pub fn shutdown(&self, kind: RepositoryKind, ctx: &RequestContext) -> RepoResult<bool> {
        let scope = TenantScope::new(ctx.effective_scope()?)?;
        let label = Self::label(kind, scope.as_str());
        let removed = self.cache.remove_if(&label, |_, e| e.is_unused()).is_some();
        if removed {
            debug!(label = %label, "repository shut down");
        } else if self.cache.contains_key(&label) {
            warn!(label = %label, "repository still in use, not shut down");
        }
        Ok(removed)
    }

    /// Evict every idle, unused handle. Returns the number evicted.
    pub fn evict_expired(&self) -> usize {
        let now = self.now_ms();
        let ttl = self.ttl_ms();
        let before = self.cache.len();
        self.cache.retain(|_, e| !(e.is_expired(now, ttl) && e.is_unused()));
        let evicted = before.saturating_sub(self.cache.len());
        if evicted > 0 {
            debug!(evicted, "evicted idle repositories");
        }
        evicted
    }

    /// Labels of all cached repositories, sorted.
    pub fn cached_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        labels.sort();
        labels
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("backend", &self.factory.backend_name())
            .field("cached", &self.len())
            .finish()
    }
}
