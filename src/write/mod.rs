//! Composite writer: decomposes a before/after pair into ordered
//! create, update and delete calls on per-node writer customizers.
mod registry;

use std::fmt;
use std::sync::Arc;

pub use registry::{PlannedWrite, WriterRegistry, WriterRegistryBuilder};

use crate::context::WriteContext;
use crate::data::Node;
use crate::error::Operation;
use crate::path::NodePath;

/// Applies changes of one node type to the device.
///
/// Writers own the identity mappings of the resources they create: after a
/// successful create they `put` the new mapping, after a delete they
/// `remove` it, both through [`WriteContext::naming`].
pub trait WriterCustomizer: Send + Sync {
    /// Create the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device call fails.
    fn create(&self, path: &NodePath, after: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()>;

    /// Update the node at `path` in place. Only called when
    /// [`supports_update`](Self::supports_update) returns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device call fails.
    fn update(
        &self,
        path: &NodePath,
        before: &Node,
        after: &Node,
        ctx: &mut WriteContext<'_>,
    ) -> anyhow::Result<()> {
        let _ = (before, after, ctx);
        anyhow::bail!("in-place update of {path} is not supported")
    }

    /// Delete the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device call fails.
    fn delete(&self, path: &NodePath, before: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()>;

    /// Whether [`update`](Self::update) is implemented. When `false`, a
    /// change is applied as a delete of the old node followed by a create
    /// of the new one.
    fn supports_update(&self) -> bool {
        false
    }
}

/// A registered writer.
#[derive(Clone)]
pub struct Writer(Arc<dyn WriterCustomizer>);

impl Writer {
    /// Wrap a customizer.
    pub fn new(customizer: impl WriterCustomizer + 'static) -> Self {
        Self(Arc::new(customizer))
    }

    pub(crate) fn customizer(&self) -> &dyn WriterCustomizer {
        self.0.as_ref()
    }
}

impl From<Arc<dyn WriterCustomizer>> for Writer {
    fn from(customizer: Arc<dyn WriterCustomizer>) -> Self {
        Self(customizer)
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Writer")
    }
}

/// What happened to one node between `before` and `after`.
#[derive(Debug, Clone, PartialEq)]
pub enum DataChange {
    /// The node appeared.
    Create {
        /// New data.
        after: Node,
    },
    /// The node changed.
    Update {
        /// Old data.
        before: Node,
        /// New data.
        after: Node,
    },
    /// The node disappeared.
    Delete {
        /// Old data.
        before: Node,
    },
    /// Nothing to do.
    Unchanged,
}

impl DataChange {
    /// Classify a before/after pair.
    ///
    /// ```
    /// use serde_json::json;
    /// use treeconf::write::DataChange;
    ///
    /// assert_eq!(DataChange::classify(None, None), DataChange::Unchanged);
    /// assert!(matches!(
    ///     DataChange::classify(None, Some(json!({"mtu": 1500}))),
    ///     DataChange::Create { .. }
    /// ));
    /// ```
    #[must_use]
    pub fn classify(before: Option<Node>, after: Option<Node>) -> Self {
        match (before, after) {
            (None, None) => Self::Unchanged,
            (None, Some(after)) => Self::Create { after },
            (Some(before), None) => Self::Delete { before },
            (Some(before), Some(after)) if before == after => Self::Unchanged,
            (Some(before), Some(after)) => Self::Update { before, after },
        }
    }

    /// Device operation this change maps to.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::Create { .. } => Some(Operation::Create),
            Self::Update { .. } => Some(Operation::Update),
            Self::Delete { .. } => Some(Operation::Delete),
            Self::Unchanged => None,
        }
    }
}
