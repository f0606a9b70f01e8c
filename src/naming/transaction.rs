//! Per-transaction overlay over the identity maps.
//!
//! Explicit `put` and `remove` calls made while a write transaction runs
//! are recorded here and only reach the [`NamingContext`] on
//! [`commit`](MappingTransaction::commit). Artificial mappings created by
//! `get_or_create` are written through immediately, since they describe
//! resources that already exist on the device, unless the transaction has
//! already removed or rebound the key's committed name.
use std::collections::BTreeMap;

use tracing::debug;

use super::{DeviceKey, NamingContext, NamingContexts};
use crate::error::NamingError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Put {
        scope: String,
        name: String,
        key: DeviceKey,
    },
    Remove {
        scope: String,
        name: String,
    },
}

impl PendingOp {
    fn targets(&self, scope: &str, name: &str) -> bool {
        match self {
            Self::Put { scope: s, name: n, .. } | Self::Remove { scope: s, name: n } => {
                s == scope && n == name
            }
        }
    }
}

/// Uncommitted mapping changes of one write transaction.
#[derive(Debug, Default)]
pub struct MappingTransaction {
    ops: Vec<PendingOp>,
    checkpoint: usize,
}

impl MappingTransaction {
    /// Empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Mark the current state; a later rollback returns to it.
    pub fn checkpoint(&mut self) {
        self.checkpoint = self.ops.len();
    }

    /// Discard every change made since the last checkpoint, returning how
    /// many were dropped.
    pub fn rollback_to_checkpoint(&mut self) -> usize {
        let dropped = self.ops.len().saturating_sub(self.checkpoint);
        self.ops.truncate(self.checkpoint);
        dropped
    }

    /// Latest pending change of `name`: `Some(Some(key))` for a put,
    /// `Some(None)` for a remove, `None` when untouched.
    fn lookup(&self, scope: &str, name: &str) -> Option<Option<&DeviceKey>> {
        self.ops
            .iter()
            .rev()
            .find(|op| op.targets(scope, name))
            .map(|op| match op {
                PendingOp::Put { key, .. } => Some(key),
                PendingOp::Remove { .. } => None,
            })
    }

    /// View of `context` through this overlay.
    pub fn view<'a>(&'a mut self, context: &'a NamingContext) -> ScopedMappings<'a> {
        ScopedMappings { context, tx: self }
    }

    /// Apply every pending change in order, returning how many were applied.
    ///
    /// Removing a name the store no longer holds is not an error here: the
    /// name may have been put and removed within this transaction.
    ///
    /// # Errors
    ///
    /// Returns the first store error, or [`NamingError::UnknownScope`] for
    /// a change recorded against a scope that is no longer configured.
    pub fn commit(self, contexts: &NamingContexts) -> Result<usize, NamingError> {
        let count = self.ops.len();
        for op in self.ops {
            match op {
                PendingOp::Put { scope, name, key } => contexts.get(&scope)?.put(&name, &key)?,
                PendingOp::Remove { scope, name } => match contexts.get(&scope)?.remove(&name) {
                    Ok(()) | Err(NamingError::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        if count > 0 {
            debug!(target: "treeconf::naming", changes = count, "mapping overlay committed");
        }
        Ok(count)
    }
}

/// A [`NamingContext`] seen through a transaction's overlay.
///
/// This is what writers receive from
/// [`WriteContext::naming`](crate::context::WriteContext::naming).
#[derive(Debug)]
pub struct ScopedMappings<'a> {
    context: &'a NamingContext,
    tx: &'a mut MappingTransaction,
}

impl ScopedMappings<'_> {
    /// Scope name.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.context.scope()
    }

    /// Record `name → key`; visible to this transaction at once and to
    /// others after commit.
    pub fn put(&mut self, name: &str, key: &DeviceKey) {
        self.tx.ops.push(PendingOp::Put {
            scope: self.scope().to_string(),
            name: name.to_string(),
            key: key.clone(),
        });
    }

    /// Device key of `name`, pending changes first.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::NotFound`] if there is no mapping.
    pub fn get(&self, name: &str) -> Result<DeviceKey, NamingError> {
        match self.tx.lookup(self.scope(), name) {
            Some(Some(key)) => Ok(key.clone()),
            Some(None) => Err(NamingError::NotFound {
                scope: self.scope().to_string(),
                name: name.to_string(),
            }),
            None => self.context.get(name),
        }
    }

    /// `true` when `name` is mapped, pending changes first.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Store`] if the backend fails.
    pub fn contains(&self, name: &str) -> Result<bool, NamingError> {
        match self.tx.lookup(self.scope(), name) {
            Some(found) => Ok(found.is_some()),
            None => self.context.contains(name),
        }
    }

    /// Record the removal of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::NotFound`] if `name` is not mapped.
    pub fn remove(&mut self, name: &str) -> Result<(), NamingError> {
        if !self.contains(name)? {
            return Err(NamingError::NotFound {
                scope: self.scope().to_string(),
                name: name.to_string(),
            });
        }
        self.tx.ops.push(PendingOp::Remove {
            scope: self.scope().to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    /// Committed mappings with the pending changes applied, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Store`] if the backend fails.
    pub fn entries(&self) -> Result<Vec<(String, DeviceKey)>, NamingError> {
        let mut merged: BTreeMap<String, DeviceKey> = self.context.entries()?.into_iter().collect();
        let scope = self.scope();
        for op in &self.tx.ops {
            match op {
                PendingOp::Put { scope: s, name, key } if s == scope => {
                    merged.insert(name.clone(), key.clone());
                }
                PendingOp::Remove { scope: s, name } if s == scope => {
                    merged.remove(name);
                }
                PendingOp::Put { .. } | PendingOp::Remove { .. } => {}
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Name mapped to a key equivalent to `key`, pending changes first.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::DuplicateKey`] if several names match.
    pub fn name_for(&self, key: &DeviceKey) -> Result<Option<String>, NamingError> {
        let entries = self.entries()?;
        Ok(self.context.find_match(&entries, key)?.map(|(name, _)| name))
    }

    /// Name and stored key for a device-observed `key`, creating (and
    /// immediately storing) an artificial mapping when none matches.
    ///
    /// When the committed name of `key` was removed or rebound earlier in
    /// this transaction, the new artificial name is recorded as a pending
    /// put instead, so it commits after the removal.
    ///
    /// # Errors
    ///
    /// See [`NamingContext::get_or_create`].
    pub fn get_or_create(&mut self, key: &DeviceKey) -> Result<(String, DeviceKey), NamingError> {
        let entries = self.entries()?;
        if let Some(found) = self.context.find_match(&entries, key)? {
            return Ok(found);
        }
        let Some(shadowed) = self.context.name_for(key)? else {
            return self.context.get_or_create(key);
        };
        let name = self.context.artificial_name(key, &entries)?;
        debug!(
            target: "treeconf::naming",
            scope = %self.scope(),
            shadowed = %shadowed,
            name = %name,
            "committed name is gone in this transaction, staging a new one"
        );
        self.put(&name, key);
        Ok((name, key.clone()))
    }
}
