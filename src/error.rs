//! Domain-specific error types for the tree engine.
//!
//! Internal modules return typed errors (e.g. [`ReadFailure`],
//! [`WriteFailure`]) while customizers at the plugin boundary return
//! [`anyhow::Error`], which the engine wraps together with the path and data
//! of the step that failed.
//!
//! # Error hierarchy
//!
//! ```text
//! EngineError
//! ├── Read(ReadFailure)               device query failed or data malformed
//! ├── Write(WriteFailure)             create, update or delete of one node
//! ├── WritePlan { failure, applied }  plan aborted part-way through
//! ├── Naming(NamingError)             identity map lookups and persistence
//! ├── Registration(OrderingConflict)  handler registration and ordering
//! └── Config(ConfigError)             configuration loading
//! ```

use std::fmt;

use thiserror::Error;

use crate::data::Node;
use crate::naming::DeviceKey;
use crate::path::NodePath;

/// Boxed error carried as the `source` of engine failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A read of the configuration tree failed.
    #[error("read failed: {0}")]
    Read(#[from] ReadFailure),

    /// A single write failed before any plan was executed.
    #[error("write failed: {0}")]
    Write(#[from] WriteFailure),

    /// A write plan was aborted by a failing step.
    ///
    /// Steps listed in `applied` were executed on the device and are not
    /// rolled back.
    #[error("write plan aborted after {} applied step(s): {failure}", .applied.len())]
    WritePlan {
        /// The failing step.
        #[source]
        failure: WriteFailure,
        /// Steps that completed before the failure, in execution order.
        applied: Vec<AppliedWrite>,
    },

    /// An identity map operation failed.
    #[error("naming error: {0}")]
    Naming(#[from] NamingError),

    /// Handler registration or ordering failed.
    #[error("registration error: {0}")]
    Registration(#[from] OrderingConflict),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// The device-facing operation a writer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Node appeared (`before` absent).
    Create,
    /// Node changed (`before` and `after` present and unequal).
    Update,
    /// Node disappeared (`after` absent).
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A write step that was executed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedWrite {
    /// Concrete path of the written node.
    pub path: NodePath,
    /// Operation that was applied.
    pub operation: Operation,
}

/// Errors raised while reading the configuration tree.
#[derive(Error, Debug)]
pub enum ReadFailure {
    /// A reader customizer failed (device query failed or returned bad data).
    #[error("failed to read {path}: {source}")]
    Failed {
        /// Path being read.
        path: NodePath,
        /// Underlying customizer error.
        source: BoxError,
    },

    /// The assembled data could not be navigated or was structurally invalid.
    #[error("malformed data at {path}: {reason}")]
    Malformed {
        /// Path being read.
        path: NodePath,
        /// Why the data is unusable.
        reason: String,
    },

    /// No reader is registered for the path or any of its ancestors.
    #[error("no reader registered for {path}")]
    NoReader {
        /// Requested path.
        path: NodePath,
    },
}

/// Errors raised while writing one node of the configuration tree.
#[derive(Error, Debug)]
pub enum WriteFailure {
    /// The writer failed to create the node.
    #[error("failed to create {path}: {source}")]
    Create {
        /// Concrete path of the node.
        path: NodePath,
        /// Data that was being created.
        after: Node,
        /// Underlying customizer error.
        source: BoxError,
    },

    /// The writer failed to update the node.
    #[error("failed to update {path}: {source}")]
    Update {
        /// Concrete path of the node.
        path: NodePath,
        /// Data before the update.
        before: Node,
        /// Data after the update.
        after: Node,
        /// Underlying customizer error.
        source: BoxError,
    },

    /// The writer failed to delete the node.
    #[error("failed to delete {path}: {source}")]
    Delete {
        /// Concrete path of the node.
        path: NodePath,
        /// Data that was being deleted.
        before: Node,
        /// Underlying customizer error.
        source: BoxError,
    },

    /// Data changed under a path that no writer handles.
    #[error("no writer registered for {path}")]
    Unhandled {
        /// Path of the unhandled change.
        path: NodePath,
    },

    /// The before/after data could not be decomposed into writer instances.
    #[error("malformed data at {path}: {reason}")]
    Malformed {
        /// Path of the offending node.
        path: NodePath,
        /// Why the data is unusable.
        reason: String,
    },
}

impl WriteFailure {
    /// Path of the node the failure refers to.
    #[must_use]
    pub const fn path(&self) -> &NodePath {
        match self {
            Self::Create { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path, .. }
            | Self::Unhandled { path }
            | Self::Malformed { path, .. } => path,
        }
    }

    /// Device operation that failed, if the failure came from a writer.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::Create { .. } => Some(Operation::Create),
            Self::Update { .. } => Some(Operation::Update),
            Self::Delete { .. } => Some(Operation::Delete),
            Self::Unhandled { .. } | Self::Malformed { .. } => None,
        }
    }
}

/// Errors raised by identity map (naming context) operations.
#[derive(Error, Debug)]
pub enum NamingError {
    /// No mapping exists for the external name.
    #[error("no mapping for '{name}' in scope '{scope}'")]
    NotFound {
        /// Naming scope.
        scope: String,
        /// External name that was looked up.
        name: String,
    },

    /// More than one name maps to what should be a single device resource.
    #[error("device key {key} in scope '{scope}' is mapped by multiple names: {}", .names.join(", "))]
    DuplicateKey {
        /// Naming scope.
        scope: String,
        /// Device key with conflicting names.
        key: DeviceKey,
        /// Every name that maps to the key.
        names: Vec<String>,
    },

    /// An artificial name is already bound to a different device key.
    #[error("artificial name '{name}' in scope '{scope}' is already bound to {existing}")]
    NameCollision {
        /// Naming scope.
        scope: String,
        /// Generated name.
        name: String,
        /// Key the name is already bound to.
        existing: DeviceKey,
    },

    /// The naming scope is not configured.
    #[error("unknown naming scope '{0}'")]
    UnknownScope(String),

    /// The persistence backend failed.
    #[error("mapping store failure in scope '{scope}': {source}")]
    Store {
        /// Naming scope.
        scope: String,
        /// Underlying backend error.
        source: BoxError,
    },
}

/// Errors raised while registering handlers; fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingConflict {
    /// Adding the edge `from → to` would close a cycle.
    #[error("ordering {from} before {to} would create a cycle")]
    Cycle {
        /// Node type that must run first.
        from: NodePath,
        /// Node type that must run after.
        to: NodePath,
    },

    /// A handler is already registered for the node type.
    #[error("a handler is already registered for {node_type}")]
    Duplicate {
        /// Duplicated node type.
        node_type: NodePath,
    },

    /// A subtree handler claims a type that is not one of its descendants.
    #[error("{child} is not a descendant of subtree handler {node_type}")]
    InvalidSubtree {
        /// Node type of the subtree handler.
        node_type: NodePath,
        /// Offending child type.
        child: NodePath,
    },

    /// The handler kind does not match the schema for its node type.
    #[error("handler for {node_type} does not match the schema: {reason}")]
    SchemaMismatch {
        /// Registered node type.
        node_type: NodePath,
        /// What does not match.
        reason: String,
    },
}

/// Errors that arise from configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading a config file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for the expected structure.
    #[error("invalid TOML in {path}: {message}")]
    Parse {
        /// Path to the file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The configuration parsed but is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while parsing a textual node path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid node path '{path}': {reason}")]
pub struct PathError {
    /// Input text.
    pub path: String,
    /// What is wrong with it.
    pub reason: String,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    // -----------------------------------------------------------------------
    // WriteFailure
    // -----------------------------------------------------------------------

    #[test]
    fn create_failure_display_names_path() {
        let e = WriteFailure::Create {
            path: path("/interfaces/interface[name=eth0]"),
            after: serde_json::json!({"name": "eth0"}),
            source: "device rejected request".into(),
        };
        assert_eq!(
            e.to_string(),
            "failed to create /interfaces/interface[name=eth0]: device rejected request"
        );
    }

    #[test]
    fn write_failure_reports_operation_and_path() {
        let e = WriteFailure::Delete {
            path: path("/gpe-feature"),
            before: serde_json::json!({"enable": true}),
            source: "timeout".into(),
        };
        assert_eq!(e.operation(), Some(Operation::Delete));
        assert_eq!(e.path(), &path("/gpe-feature"));
    }

    #[test]
    fn unhandled_write_has_no_operation() {
        let e = WriteFailure::Unhandled { path: path("/x") };
        assert_eq!(e.operation(), None);
        assert_eq!(e.to_string(), "no writer registered for /x");
    }

    #[test]
    fn write_failure_has_source() {
        use std::error::Error as StdError;
        let e = WriteFailure::Update {
            path: path("/a"),
            before: serde_json::json!({}),
            after: serde_json::json!({"x": 1}),
            source: "boom".into(),
        };
        assert!(e.source().is_some());
    }

    // -----------------------------------------------------------------------
    // NamingError / OrderingConflict
    // -----------------------------------------------------------------------

    #[test]
    fn not_found_display() {
        let e = NamingError::NotFound {
            scope: "interfaces".to_string(),
            name: "eth0".to_string(),
        };
        assert_eq!(e.to_string(), "no mapping for 'eth0' in scope 'interfaces'");
    }

    #[test]
    fn duplicate_key_lists_names() {
        let e = NamingError::DuplicateKey {
            scope: "interfaces".to_string(),
            key: DeviceKey::Index(3),
            names: vec!["a".to_string(), "b".to_string()],
        };
        assert!(e.to_string().contains("a, b"));
        assert!(e.to_string().contains("interfaces"));
    }

    #[test]
    fn cycle_display_names_both_endpoints() {
        let e = OrderingConflict::Cycle {
            from: path("/a"),
            to: path("/b"),
        };
        assert_eq!(e.to_string(), "ordering /a before /b would create a cycle");
    }

    // -----------------------------------------------------------------------
    // EngineError conversions
    // -----------------------------------------------------------------------

    #[test]
    fn engine_error_from_ordering_conflict() {
        let e: EngineError = OrderingConflict::Duplicate {
            node_type: path("/a"),
        }
        .into();
        assert!(e.to_string().contains("registration error"));
    }

    #[test]
    fn write_plan_display_counts_applied_steps() {
        let e = EngineError::WritePlan {
            failure: WriteFailure::Unhandled { path: path("/b") },
            applied: vec![AppliedWrite {
                path: path("/a"),
                operation: Operation::Create,
            }],
        };
        assert!(e.to_string().starts_with("write plan aborted after 1 applied step(s)"));
    }

    #[test]
    fn config_error_io_display() {
        let e = ConfigError::Io {
            path: "/etc/treeconf.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.to_string().contains("/etc/treeconf.toml"));
    }

    // -----------------------------------------------------------------------
    // Send + Sync bounds
    // -----------------------------------------------------------------------

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<EngineError>();
        assert_send_sync::<ReadFailure>();
        assert_send_sync::<WriteFailure>();
        assert_send_sync::<NamingError>();
        assert_send_sync::<OrderingConflict>();
        assert_send_sync::<ConfigError>();
    }

    #[test]
    fn read_failure_converts_to_anyhow() {
        let e = ReadFailure::NoReader { path: path("/a") };
        let _anyhow_err: anyhow::Error = e.into();
    }
}
