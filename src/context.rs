//! Per-transaction state handed to customizers.
//!
//! A transaction owns exactly one context. [`ReadContext`] carries the
//! [`DumpCache`] that deduplicates device queries within one read and
//! direct access to the identity maps. [`WriteContext`] additionally
//! exposes the transaction's before/after data and routes identity map
//! changes through the transaction's [`MappingTransaction`] overlay.
//! Nothing in a context outlives its transaction.
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::data::Node;
use crate::device::{DeviceError, Reply, ReplyFuture, wait_for_reply};
use crate::error::NamingError;
use crate::logging::Log;
use crate::naming::{MappingTransaction, NamingContext, NamingContexts, ScopedMappings};
use crate::path::NodePath;
use crate::schema::NavigationTable;

type CachedDump = Arc<dyn Any + Send + Sync>;

/// Read-through cache of device dumps keyed by `(dump kind, path)`.
///
/// Customizers that dump a whole table to answer per-element questions
/// store the dump once per transaction and reuse it for every element.
#[derive(Default)]
pub struct DumpCache {
    entries: Mutex<HashMap<(String, NodePath), CachedDump>>,
}

impl fmt::Debug for DumpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl DumpCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached dump of `kind` at `path`, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, kind: &str, path: &NodePath) -> Option<Arc<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(kind.to_string(), path.clone()))
            .cloned()
            .and_then(|dump| dump.downcast::<T>().ok())
    }

    /// Store a dump, replacing any previous one under the same key.
    pub fn put<T: Any + Send + Sync>(&self, kind: &str, path: &NodePath, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind.to_string(), path.clone()), Arc::clone(&value) as CachedDump);
        value
    }

    /// Cached dump, or the result of `load` stored for later calls.
    ///
    /// The lock is not held while `load` runs. If two callers race, the
    /// first stored value wins and both receive it.
    ///
    /// # Errors
    ///
    /// Propagates the error of `load`; nothing is cached in that case.
    pub fn get_or_load<T, F>(&self, kind: &str, path: &NodePath, load: F) -> anyhow::Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<T>,
    {
        if let Some(hit) = self.get::<T>(kind, path) {
            trace!(target: "treeconf::context", kind, path = %path, "dump cache hit");
            return Ok(hit);
        }
        let loaded: CachedDump = Arc::new(load()?);
        let stored = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                entries
                    .entry((kind.to_string(), path.clone()))
                    .or_insert(loaded),
            )
        };
        stored
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("dump '{kind}' at {path} is cached with another type"))
    }

    /// Number of cached dumps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Context of one read transaction.
#[derive(Debug)]
pub struct ReadContext<'a> {
    transaction: u64,
    cache: DumpCache,
    naming: &'a NamingContexts,
    reply_timeout: Duration,
}

impl<'a> ReadContext<'a> {
    /// Fresh context with an empty cache.
    #[must_use]
    pub fn new(transaction: u64, naming: &'a NamingContexts, reply_timeout: Duration) -> Self {
        Self {
            transaction,
            cache: DumpCache::new(),
            naming,
            reply_timeout,
        }
    }

    /// Transaction id.
    #[must_use]
    pub const fn transaction(&self) -> u64 {
        self.transaction
    }

    /// The transaction's dump cache.
    #[must_use]
    pub const fn cache(&self) -> &DumpCache {
        &self.cache
    }

    /// Identity map of `scope`. Artificial mappings created while reading
    /// are stored immediately.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownScope`] if the scope is not configured.
    pub fn naming(&self, scope: &str) -> Result<&'a NamingContext, NamingError> {
        self.naming.get(scope).map(Arc::as_ref)
    }

    /// Bounded wait applied to device replies.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Wait for a device reply using the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`wait_for_reply`].
    pub fn wait(&self, future: ReplyFuture) -> Result<Reply, DeviceError> {
        wait_for_reply(future, self.reply_timeout)
    }
}

/// Context of one write transaction.
pub struct WriteContext<'a> {
    transaction: u64,
    base: &'a NodePath,
    before: Option<&'a Node>,
    after: Option<&'a Node>,
    nav: &'a NavigationTable,
    naming: &'a NamingContexts,
    mappings: MappingTransaction,
    cache: DumpCache,
    log: &'a dyn Log,
    reply_timeout: Duration,
}

impl fmt::Debug for WriteContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteContext")
            .field("transaction", &self.transaction)
            .field("base", &self.base)
            .field("mappings", &self.mappings)
            .field("cache", &self.cache)
            .field("log", &"<dyn Log>")
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}

/// Borrowed inputs of a write transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteScope<'a> {
    pub(crate) base: &'a NodePath,
    pub(crate) before: Option<&'a Node>,
    pub(crate) after: Option<&'a Node>,
    pub(crate) nav: &'a NavigationTable,
    pub(crate) naming: &'a NamingContexts,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        transaction: u64,
        scope: WriteScope<'a>,
        log: &'a dyn Log,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            transaction,
            base: scope.base,
            before: scope.before,
            after: scope.after,
            nav: scope.nav,
            naming: scope.naming,
            mappings: MappingTransaction::new(),
            cache: DumpCache::new(),
            log,
            reply_timeout,
        }
    }

    /// Transaction id.
    #[must_use]
    pub const fn transaction(&self) -> u64 {
        self.transaction
    }

    /// Node at `path` in the data before the transaction.
    #[must_use]
    pub fn read_before(&self, path: &NodePath) -> Option<&'a Node> {
        self.before
            .and_then(|data| self.nav.navigate(self.base, data, path))
    }

    /// Node at `path` in the data after the transaction.
    #[must_use]
    pub fn read_after(&self, path: &NodePath) -> Option<&'a Node> {
        self.after
            .and_then(|data| self.nav.navigate(self.base, data, path))
    }

    /// Identity map of `scope`, seen through this transaction's overlay.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownScope`] if the scope is not configured.
    pub fn naming(&mut self, scope: &str) -> Result<ScopedMappings<'_>, NamingError> {
        let context = self.naming.get(scope)?;
        Ok(self.mappings.view(context))
    }

    /// The transaction's dump cache.
    #[must_use]
    pub const fn cache(&self) -> &DumpCache {
        &self.cache
    }

    /// The transaction's logger.
    #[must_use]
    pub fn log(&self) -> &dyn Log {
        self.log
    }

    /// Bounded wait applied to device replies.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Wait for a device reply using the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`wait_for_reply`].
    pub fn wait(&self, future: ReplyFuture) -> Result<Reply, DeviceError> {
        wait_for_reply(future, self.reply_timeout)
    }

    pub(crate) fn checkpoint(&mut self) {
        self.mappings.checkpoint();
    }

    pub(crate) fn rollback_step(&mut self) -> usize {
        self.mappings.rollback_to_checkpoint()
    }

    pub(crate) fn into_mappings(self) -> MappingTransaction {
        self.mappings
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use super::*;
    use crate::logging::Logger;
    use crate::naming::{ArtificialNamePolicy, DeviceKey, InMemoryStore, KeyEquivalence};
    use crate::schema::Schema;
    use serde_json::json;
    use std::cell::Cell;

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    fn contexts() -> NamingContexts {
        let mut contexts = NamingContexts::new();
        contexts.insert(NamingContext::new(
            "if",
            Arc::new(InMemoryStore::new()),
            ArtificialNamePolicy::default(),
            KeyEquivalence::Exact,
        ));
        contexts
    }

    #[test]
    fn cache_loads_once_per_key() {
        let cache = DumpCache::new();
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            Ok(vec![1u32, 2, 3])
        };
        let first = cache.get_or_load("dump", &path("/a"), load).unwrap();
        let second = cache
            .get_or_load("dump", &path("/a"), || -> anyhow::Result<Vec<u32>> {
                unreachable!("cached")
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_distinguishes_kind_and_path() {
        let cache = DumpCache::new();
        cache.put("a", &path("/x"), 1u8);
        cache.put("b", &path("/x"), 2u8);
        cache.put("a", &path("/y"), 3u8);
        assert_eq!(*cache.get::<u8>("b", &path("/x")).unwrap(), 2);
        assert!(cache.get::<u16>("a", &path("/x")).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn failed_load_is_not_cached() {
        let cache = DumpCache::new();
        let err = cache
            .get_or_load::<u8, _>("dump", &path("/a"), || anyhow::bail!("device down"))
            .unwrap_err();
        assert_eq!(err.to_string(), "device down");
        assert!(cache.is_empty());
    }

    #[test]
    fn read_context_resolves_scopes() {
        let naming = contexts();
        let ctx = ReadContext::new(1, &naming, Duration::from_secs(1));
        assert!(ctx.naming("if").is_ok());
        assert!(ctx.naming("missing").is_err());
    }

    #[test]
    fn write_context_navigates_before_and_after() {
        let naming = contexts();
        let nav = NavigationTable::build(
            &Schema::new().list(path("/interfaces/interface"), &["name"]),
        );
        let base = NodePath::root();
        let before = json!({"interfaces": {"interface": [{"name": "eth0", "mtu": 1500}]}});
        let after = json!({"interfaces": {"interface": [{"name": "eth0", "mtu": 9000}]}});
        let log = Logger::new(1);
        let scope = WriteScope {
            base: &base,
            before: Some(&before),
            after: Some(&after),
            nav: &nav,
            naming: &naming,
        };
        let mut ctx = WriteContext::new(1, scope, &log, Duration::from_secs(1));
        let mtu = path("/interfaces/interface[name=eth0]/mtu");
        assert_eq!(ctx.read_before(&mtu), Some(&json!(1500)));
        assert_eq!(ctx.read_after(&mtu), Some(&json!(9000)));

        ctx.naming("if").unwrap().put("eth0", &DeviceKey::Index(1));
        ctx.checkpoint();
        ctx.naming("if").unwrap().put("eth1", &DeviceKey::Index(2));
        assert_eq!(ctx.rollback_step(), 1);
        let tx = ctx.into_mappings();
        assert_eq!(tx.len(), 1);
    }
}
