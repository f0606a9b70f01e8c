//! Composite reader: assembles configuration subtrees from per-node
//! reader customizers.
//!
//! Each customizer fills the attributes of one node type; the
//! [`ReaderRegistry`] walks the registered types, merges children into
//! their parents and decides presence: a node whose builder is still equal
//! to a fresh one after reading reads as absent.
mod registry;

use std::fmt;
use std::sync::Arc;

pub use registry::{ReaderRegistry, ReaderRegistryBuilder};

use crate::context::ReadContext;
use crate::data::{Node, NodeBuilder};
use crate::path::{Key, NodePath};

/// Whether a node's own attributes are read before or after its children.
///
/// The two orders are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraversalOrder {
    /// Attributes first, then children.
    #[default]
    PreOrder,
    /// Children first, then attributes.
    PostOrder,
}

/// Reads the attributes of one container node type.
pub trait ReaderCustomizer: Send + Sync {
    /// Builder for the node at `path`. The default pre-fills the key leaves
    /// of a list element.
    fn new_builder(&self, path: &NodePath) -> NodeBuilder {
        NodeBuilder::for_path(path)
    }

    /// Query the device and set the node's attributes on `builder`.
    ///
    /// Leaving the builder untouched reports the node as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails or returns unusable data.
    fn read_current_attributes(
        &self,
        path: &NodePath,
        builder: &mut NodeBuilder,
        ctx: &ReadContext<'_>,
    ) -> anyhow::Result<()>;

    /// Attach the node read by this customizer to its parent's builder.
    fn merge(&self, parent: &mut NodeBuilder, name: &str, node: Node) {
        parent.merge_child(name, node);
    }

    /// Phase order for this node.
    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::PreOrder
    }
}

/// Reads the elements of one list node type.
pub trait ListReaderCustomizer: ReaderCustomizer {
    /// Keys of every element present on the device, in device order.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    fn all_ids(&self, path: &NodePath, ctx: &ReadContext<'_>) -> anyhow::Result<Vec<Key>>;

    /// Attach the elements read for this list to the parent's builder.
    fn merge_list(&self, parent: &mut NodeBuilder, name: &str, items: Vec<Node>) {
        parent.merge_list(name, items);
    }
}

/// A registered reader.
#[derive(Clone)]
pub enum Reader {
    /// Reader of a container type.
    Single(Arc<dyn ReaderCustomizer>),
    /// Reader of a list type.
    List(Arc<dyn ListReaderCustomizer>),
    /// No attributes of its own; present when any child is present.
    Structural,
}

impl Reader {
    /// Wrap a container customizer.
    pub fn single(customizer: impl ReaderCustomizer + 'static) -> Self {
        Self::Single(Arc::new(customizer))
    }

    /// Wrap a list customizer.
    pub fn list(customizer: impl ListReaderCustomizer + 'static) -> Self {
        Self::List(Arc::new(customizer))
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::List(_) => "list",
            Self::Structural => "structural",
        }
    }

    fn traversal_order(&self) -> TraversalOrder {
        match self {
            Self::Single(c) => c.traversal_order(),
            Self::List(c) => c.traversal_order(),
            Self::Structural => TraversalOrder::PreOrder,
        }
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reader::{}", self.kind())
    }
}
