//! Persistence backends for identity maps.
//!
//! The engine needs only the primitives on [`MappingStore`]; records are
//! addressed by `(scope, name)`. [`InMemoryStore`] lives for the process,
//! [`JsonFileStore`] survives restarts.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{Context as _, Result};
use tracing::debug;

use super::key::DeviceKey;

/// Scope name → external name → device key.
type Table = BTreeMap<String, BTreeMap<String, DeviceKey>>;

/// Durable storage for mapping records.
#[cfg_attr(test, mockall::automock)]
pub trait MappingStore: Send + Sync {
    /// Record stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn read(&self, scope: &str, name: &str) -> Result<Option<DeviceKey>>;

    /// Store `key` under `name`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn put(&self, scope: &str, name: &str, key: &DeviceKey) -> Result<()>;

    /// Delete the record under `name`; deleting a missing record is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, scope: &str, name: &str) -> Result<()>;

    /// Every record of the scope, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn entries(&self, scope: &str) -> Result<Vec<(String, DeviceKey)>>;
}

fn scope_entries(table: &Table, scope: &str) -> Vec<(String, DeviceKey)> {
    table
        .get(scope)
        .map(|names| {
            names
                .iter()
                .map(|(name, key)| (name.clone(), key.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn remove_record(table: &mut Table, scope: &str, name: &str) -> bool {
    let Some(names) = table.get_mut(scope) else {
        return false;
    };
    let removed = names.remove(name).is_some();
    if names.is_empty() {
        table.remove(scope);
    }
    removed
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    table: RwLock<Table>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingStore for InMemoryStore {
    fn read(&self, scope: &str, name: &str) -> Result<Option<DeviceKey>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(table.get(scope).and_then(|names| names.get(name)).cloned())
    }

    fn put(&self, scope: &str, name: &str, key: &DeviceKey) -> Result<()> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), key.clone());
        Ok(())
    }

    fn delete(&self, scope: &str, name: &str) -> Result<()> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        remove_record(&mut table, scope, name);
        Ok(())
    }

    fn entries(&self, scope: &str) -> Result<Vec<(String, DeviceKey)>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(scope_entries(&table, scope))
    }
}

/// Store persisted as a JSON document (`{scope: {name: key}}`).
///
/// The whole document is rewritten on every change through a temporary
/// file and a rename, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading mapping store {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing mapping store {}", path.display()))?
        } else {
            Table::new()
        };
        debug!(
            target: "treeconf::naming",
            path = %path.display(),
            scopes = table.len(),
            "opened mapping store"
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &Table) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(table).context("serializing mapping store")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl MappingStore for JsonFileStore {
    fn read(&self, scope: &str, name: &str) -> Result<Option<DeviceKey>> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.get(scope).and_then(|names| names.get(name)).cloned())
    }

    fn put(&self, scope: &str, name: &str, key: &DeviceKey) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = table
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), key.clone());
        if let Err(e) = self.persist(&table) {
            // Keep memory and file in agreement.
            match previous {
                Some(previous) => {
                    table
                        .entry(scope.to_string())
                        .or_default()
                        .insert(name.to_string(), previous);
                }
                None => {
                    remove_record(&mut table, scope, name);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, scope: &str, name: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = table.get(scope).and_then(|names| names.get(name)).cloned();
        let Some(previous) = previous else {
            return Ok(());
        };
        remove_record(&mut table, scope, name);
        if let Err(e) = self.persist(&table) {
            table
                .entry(scope.to_string())
                .or_default()
                .insert(name.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn entries(&self, scope: &str) -> Result<Vec<(String, DeviceKey)>> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(scope_entries(&table, scope))
    }
}
