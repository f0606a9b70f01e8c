//! Engine configuration loaded from TOML.
//!
//! ```toml
//! [engine]
//! reply_timeout_ms = 5000
//! parallel_list_reads = true
//!
//! [persistence]
//! backend = "file"
//! path = "/var/lib/treeconf/naming.json"
//!
//! [[naming]]
//! scope = "gpe-entries"
//! policy = { kind = "composed", separator = "_" }
//! ```
pub mod toml_loader;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::naming::{
    ArtificialNamePolicy, InMemoryStore, JsonFileStore, KeyEquivalence, MappingStore, NamingContext,
    NamingContexts,
};

/// Load and validate the configuration at `path`.
///
/// # Errors
///
/// See [`EngineConfig::load`].
pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
    EngineConfig::load(path)
}

/// Default bounded wait for device replies.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;

const fn default_reply_timeout_ms() -> u64 {
    DEFAULT_REPLY_TIMEOUT_MS
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Runtime settings.
    #[serde(default)]
    pub engine: EngineSection,
    /// Where identity mappings are kept.
    #[serde(default)]
    pub persistence: PersistenceSection,
    /// Configured naming scopes.
    #[serde(default)]
    pub naming: Vec<NamingScope>,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Bounded wait applied to every device reply, in milliseconds.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Read the elements of keyed lists in parallel.
    #[serde(default)]
    pub parallel_list_reads: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            parallel_list_reads: false,
        }
    }
}

/// Mapping store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Mappings live for the process only.
    #[default]
    Memory,
    /// Mappings are kept in a JSON file.
    File,
}

/// `[persistence]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceSection {
    /// Store backend.
    #[serde(default)]
    pub backend: Backend,
    /// File used by the `file` backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One `[[naming]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingScope {
    /// Scope name used by customizers.
    pub scope: String,
    /// How artificial names are built.
    #[serde(default)]
    pub policy: ArtificialNamePolicy,
    /// How observed keys are matched against stored ones.
    #[serde(default)]
    pub equivalence: KeyEquivalence,
}

impl EngineConfig {
    /// Load and validate the configuration at `path`. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml_loader::load_config(path)?;
        config.validate()?;
        // Relative store paths are relative to the config file.
        if let Some(store) = &mut config.persistence.path
            && store.is_relative()
            && let Some(dir) = path.parent()
        {
            *store = dir.join(&*store);
        }
        debug!(
            target: "treeconf::config",
            path = %path.display(),
            scopes = config.naming.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_loader::parse(content, Path::new("<inline>"))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero reply timeout, a `file`
    /// backend without a path, or a scope configured twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.reply_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.persistence.backend == Backend::File && self.persistence.path.is_none() {
            return Err(ConfigError::Invalid(
                "persistence.path is required for the file backend".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for scope in &self.naming {
            if scope.scope.is_empty() {
                return Err(ConfigError::Invalid("naming scope name is empty".to_string()));
            }
            if !seen.insert(scope.scope.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "naming scope '{}' is configured more than once",
                    scope.scope
                )));
            }
        }
        Ok(())
    }

    /// Bounded wait for device replies.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.reply_timeout_ms)
    }

    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the mapping file cannot be opened.
    pub fn open_store(&self) -> Result<Arc<dyn MappingStore>, ConfigError> {
        match (&self.persistence.backend, &self.persistence.path) {
            (Backend::File, Some(path)) => {
                let store = JsonFileStore::open(path).map_err(|e| {
                    ConfigError::Invalid(format!("cannot open mapping store {}: {e:#}", path.display()))
                })?;
                Ok(Arc::new(store))
            }
            (Backend::File, None) => Err(ConfigError::Invalid(
                "persistence.path is required for the file backend".to_string(),
            )),
            (Backend::Memory, _) => Ok(Arc::new(InMemoryStore::new())),
        }
    }

    /// One naming context per configured scope, all sharing `store`.
    #[must_use]
    pub fn naming_contexts(&self, store: &Arc<dyn MappingStore>) -> NamingContexts {
        let mut contexts = NamingContexts::new();
        for scope in &self.naming {
            contexts.insert(NamingContext::new(
                scope.scope.clone(),
                Arc::clone(store),
                scope.policy.clone(),
                scope.equivalence,
            ));
        }
        contexts
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.reply_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn full_file_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("treeconf.toml");
        fs::write(
            &path,
            r#"
[engine]
reply_timeout_ms = 250
parallel_list_reads = true

[persistence]
backend = "file"
path = "naming.json"

[[naming]]
scope = "gpe-entries"
policy = { kind = "composed", separator = "-" }

[[naming]]
scope = "locators"
policy = { kind = "prefix-length", default_length = 64 }
equivalence = "same-subnet"
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.engine.parallel_list_reads);
        assert_eq!(config.reply_timeout(), Duration::from_millis(250));
        assert_eq!(config.persistence.backend, Backend::File);
        assert_eq!(config.persistence.path, Some(dir.path().join("naming.json")));
        assert_eq!(config.naming.len(), 2);
        assert_eq!(config.naming[1].equivalence, KeyEquivalence::SameSubnet);
        assert_eq!(
            config.naming[0].policy,
            ArtificialNamePolicy::Composed {
                separator: "-".to_string()
            }
        );
    }

    #[test]
    fn parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[engine]\nreply_timeout_ms = \"soon\"\n").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = EngineConfig::from_toml("[engine]\ntimeout = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn file_backend_requires_path() {
        let err = EngineConfig::from_toml("[persistence]\nbackend = \"file\"\n").unwrap_err();
        assert!(err.to_string().contains("persistence.path"));
    }

    #[test]
    fn duplicate_scope_is_rejected() {
        let err = EngineConfig::from_toml("[[naming]]\nscope = \"a\"\n[[naming]]\nscope = \"a\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(EngineConfig::from_toml("[engine]\nreply_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn naming_contexts_cover_every_scope() {
        let config =
            EngineConfig::from_toml("[[naming]]\nscope = \"b\"\n[[naming]]\nscope = \"a\"\n").unwrap();
        let store = config.open_store().unwrap();
        let contexts = config.naming_contexts(&store);
        assert_eq!(contexts.scopes(), vec!["a", "b"]);
    }

    #[test]
    fn file_store_is_opened_at_configured_path() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            persistence: PersistenceSection {
                backend: Backend::File,
                path: Some(dir.path().join("naming.json")),
            },
            ..EngineConfig::default()
        };
        assert!(config.open_store().is_ok());
    }
}
