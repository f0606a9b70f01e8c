//! Identity maps between stable external names and device keys.
//!
//! Most device resources only have process-lifetime handles. A
//! [`NamingContext`] keeps one durable name per resource for a single
//! scope (resource category), synthesizing an artificial name the first
//! time a resource is observed without one. Each context serializes its
//! own mutations; unrelated scopes never contend.
//!
//! Writers see the maps through a per-transaction [`ScopedMappings`] view
//! whose explicit changes stay private until the transaction commits.
pub mod key;
pub mod policy;
pub mod store;
pub mod transaction;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

pub use key::{DeviceKey, KeyEquivalence, KeyField};
pub use policy::ArtificialNamePolicy;
pub use store::{InMemoryStore, JsonFileStore, MappingStore};
pub use transaction::{MappingTransaction, ScopedMappings};

use crate::error::NamingError;

/// One record of an identity map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Naming scope.
    pub scope: String,
    /// Stable external name.
    pub name: String,
    /// Device key the name resolves to.
    pub key: DeviceKey,
}

/// Identity map for one scope.
pub struct NamingContext {
    scope: String,
    store: Arc<dyn MappingStore>,
    policy: ArtificialNamePolicy,
    equivalence: KeyEquivalence,
    lock: Mutex<()>,
}

impl fmt::Debug for NamingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingContext")
            .field("scope", &self.scope)
            .field("policy", &self.policy)
            .field("equivalence", &self.equivalence)
            .finish_non_exhaustive()
    }
}

impl NamingContext {
    /// Context for `scope` backed by `store`.
    pub fn new(
        scope: impl Into<String>,
        store: Arc<dyn MappingStore>,
        policy: ArtificialNamePolicy,
        equivalence: KeyEquivalence,
    ) -> Self {
        Self {
            scope: scope.into(),
            store,
            policy,
            equivalence,
            lock: Mutex::new(()),
        }
    }

    /// Scope name.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn store_error(&self, source: anyhow::Error) -> NamingError {
        NamingError::Store {
            scope: self.scope.clone(),
            source: source.into(),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map `name` to `key`, replacing any previous mapping of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Store`] if the backend fails.
    pub fn put(&self, name: &str, key: &DeviceKey) -> Result<(), NamingError> {
        let _guard = self.guard();
        self.store
            .put(&self.scope, name, key)
            .map_err(|e| self.store_error(e))?;
        debug!(target: "treeconf::naming", scope = %self.scope, name, key = %key, "mapping stored");
        Ok(())
    }

    /// Device key mapped to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::NotFound`] if there is no mapping.
    pub fn get(&self, name: &str) -> Result<DeviceKey, NamingError> {
        self.store
            .read(&self.scope, name)
            .map_err(|e| self.store_error(e))?
            .ok_or_else(|| NamingError::NotFound {
                scope: self.scope.clone(),
                name: name.to_string(),
            })
    }

    /// `true` when `name` is mapped.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Store`] if the backend fails.
    pub fn contains(&self, name: &str) -> Result<bool, NamingError> {
        Ok(self
            .store
            .read(&self.scope, name)
            .map_err(|e| self.store_error(e))?
            .is_some())
    }

    /// Delete the mapping of `name`. The device resource is unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::NotFound`] if there is no mapping.
    pub fn remove(&self, name: &str) -> Result<(), NamingError> {
        let _guard = self.guard();
        if !self.contains(name)? {
            return Err(NamingError::NotFound {
                scope: self.scope.clone(),
                name: name.to_string(),
            });
        }
        self.store
            .delete(&self.scope, name)
            .map_err(|e| self.store_error(e))?;
        debug!(target: "treeconf::naming", scope = %self.scope, name, "mapping removed");
        Ok(())
    }

    /// Name currently mapped to a key equivalent to `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::DuplicateKey`] if several names match.
    pub fn name_for(&self, key: &DeviceKey) -> Result<Option<String>, NamingError> {
        let entries = self.entries()?;
        self.find_match(&entries, key)
            .map(|found| found.map(|(name, _)| name))
    }

    /// Every mapping of the scope, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Store`] if the backend fails.
    pub fn entries(&self) -> Result<Vec<(String, DeviceKey)>, NamingError> {
        self.store
            .entries(&self.scope)
            .map_err(|e| self.store_error(e))
    }

    /// Name and stored key for a device-observed `key`, creating an
    /// artificial mapping when none matches.
    ///
    /// The scan and the create run under the scope's lock, so concurrent
    /// callers observing the same resource all get the same name.
    ///
    /// # Errors
    ///
    /// - [`NamingError::DuplicateKey`] if several names already match.
    /// - [`NamingError::NameCollision`] if the generated name is bound to
    ///   an unrelated key.
    /// - [`NamingError::Store`] if the backend fails.
    pub fn get_or_create(&self, key: &DeviceKey) -> Result<(String, DeviceKey), NamingError> {
        let _guard = self.guard();
        let entries = self.entries()?;
        if let Some(found) = self.find_match(&entries, key)? {
            return Ok(found);
        }

        let name = self.artificial_name(key, &entries)?;
        self.store
            .put(&self.scope, &name, key)
            .map_err(|e| self.store_error(e))?;
        info!(target: "treeconf::naming", scope = %self.scope, name = %name, key = %key, "artificial mapping created");
        Ok((name, key.clone()))
    }

    /// Policy name for `key` given the scope's current `entries`.
    pub(crate) fn artificial_name(
        &self,
        key: &DeviceKey,
        entries: &[(String, DeviceKey)],
    ) -> Result<String, NamingError> {
        let existing: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        let name = self.policy.name(key, &existing);
        if let Some((_, bound)) = entries.iter().find(|(n, _)| *n == name) {
            return Err(NamingError::NameCollision {
                scope: self.scope.clone(),
                name,
                existing: bound.clone(),
            });
        }
        Ok(name)
    }

    pub(crate) fn find_match(
        &self,
        entries: &[(String, DeviceKey)],
        key: &DeviceKey,
    ) -> Result<Option<(String, DeviceKey)>, NamingError> {
        let matching: Vec<&(String, DeviceKey)> = entries
            .iter()
            .filter(|(_, stored)| self.equivalence.matches(stored, key))
            .collect();
        match matching.as_slice() {
            [] => Ok(None),
            [(name, stored)] => Ok(Some((name.clone(), stored.clone()))),
            many => Err(NamingError::DuplicateKey {
                scope: self.scope.clone(),
                key: key.clone(),
                names: many.iter().map(|(name, _)| name.clone()).collect(),
            }),
        }
    }
}

/// The set of configured naming contexts, one per scope.
#[derive(Debug, Default)]
pub struct NamingContexts {
    contexts: HashMap<String, Arc<NamingContext>>,
}

impl NamingContexts {
    /// No scopes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the context for its scope.
    pub fn insert(&mut self, context: NamingContext) -> &mut Self {
        self.contexts
            .insert(context.scope.clone(), Arc::new(context));
        self
    }

    /// Context of `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownScope`] if the scope is not configured.
    pub fn get(&self, scope: &str) -> Result<&Arc<NamingContext>, NamingError> {
        self.contexts
            .get(scope)
            .ok_or_else(|| NamingError::UnknownScope(scope.to_string()))
    }

    /// Configured scope names, sorted.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = self.contexts.keys().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes
    }
}
