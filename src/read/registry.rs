//! Reader registration and the composite read algorithm.
use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, trace};

use super::{ListReaderCustomizer, Reader, TraversalOrder};
use crate::context::ReadContext;
use crate::data::{Node, NodeBuilder};
use crate::error::{OrderingConflict, ReadFailure};
use crate::path::{Key, NodePath};
use crate::registry::{HandlerRegistry, OrderedHandlers, Registered, Relations};
use crate::schema::NavigationTable;

/// Collects reader registrations before they are frozen into a
/// [`ReaderRegistry`].
///
/// Children of a node are read in registration order unless relations say
/// otherwise.
#[derive(Debug)]
pub struct ReaderRegistryBuilder {
    registry: HandlerRegistry<Reader>,
    nav: Arc<NavigationTable>,
    parallel: bool,
}

impl ReaderRegistryBuilder {
    /// Empty builder for trees described by `nav`.
    #[must_use]
    pub fn new(nav: Arc<NavigationTable>) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            nav,
            parallel: false,
        }
    }

    /// Read the elements of keyed lists in parallel.
    #[must_use]
    pub const fn parallel_list_reads(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Register a reader with explicit relations.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn register(
        &mut self,
        node_type: NodePath,
        reader: Reader,
        relations: Relations,
    ) -> Result<&mut Self, OrderingConflict> {
        self.registry.register(node_type, reader, relations)?;
        Ok(self)
    }

    /// Register a reader.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add(&mut self, node_type: NodePath, reader: Reader) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, reader, Relations::new())
    }

    /// Register a reader that runs before `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add_before(
        &mut self,
        node_type: NodePath,
        reader: Reader,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, reader, Relations::new().before(related.clone()))
    }

    /// Register a reader that runs after `related`.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add_after(
        &mut self,
        node_type: NodePath,
        reader: Reader,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, reader, Relations::new().after(related.clone()))
    }

    /// Register a reader that fills `children` itself.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn subtree_add(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        reader: Reader,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, reader, Relations::new().subtree(children))
    }

    /// Register a structural reader for a container with no attributes of
    /// its own.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn add_structural(&mut self, node_type: NodePath) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, Reader::Structural, Relations::new())
    }

    /// Validate readers against the schema, fill missing ancestors with
    /// structural readers and freeze the registry.
    ///
    /// # Errors
    ///
    /// Returns [`OrderingConflict::SchemaMismatch`] when a reader kind does
    /// not match the node kind or a list ancestor has no list reader.
    pub fn build(mut self) -> Result<ReaderRegistry, OrderingConflict> {
        for registered in self.registry.registered() {
            check_kind(&self.nav, registered)?;
        }

        let mut missing: Vec<NodePath> = Vec::new();
        // Readers inside a subtree owner's region are never dispatched.
        for registered in self
            .registry
            .registered()
            .filter(|r| !self.registry.is_claimed(&r.node_type))
        {
            for ancestor in registered.node_type.ancestors() {
                if self.registry.contains(&ancestor) || missing.contains(&ancestor) {
                    continue;
                }
                if self.nav.is_list(&ancestor) {
                    return Err(OrderingConflict::SchemaMismatch {
                        node_type: ancestor,
                        reason: format!("list has no reader but {} does", registered.node_type),
                    });
                }
                missing.push(ancestor);
            }
        }
        // Shallow first so structural parents precede their children.
        missing.sort_by_key(NodePath::len);
        for node_type in missing {
            debug!(target: "treeconf::read", node_type = %node_type, "adding structural reader");
            self.registry.add(node_type, Reader::Structural)?;
        }

        let handlers = self.registry.build();
        let mut children: HashMap<NodePath, Vec<NodePath>> = HashMap::new();
        for registered in &handlers {
            let parent = registered.node_type.parent().unwrap_or_else(NodePath::root);
            if parent.is_root() || handlers.get(&parent).is_some() {
                children
                    .entry(parent)
                    .or_default()
                    .push(registered.node_type.clone());
            }
        }

        Ok(ReaderRegistry {
            handlers,
            children,
            nav: self.nav,
            parallel: self.parallel,
        })
    }
}

fn check_kind(nav: &NavigationTable, registered: &Registered<Reader>) -> Result<(), OrderingConflict> {
    let is_list = nav.is_list(&registered.node_type);
    let reason = match (&registered.handler, is_list) {
        (Reader::List(_), false) => "list reader registered for a container",
        (Reader::Single(_) | Reader::Structural, true) => "container reader registered for a list",
        _ => return Ok(()),
    };
    Err(OrderingConflict::SchemaMismatch {
        node_type: registered.node_type.clone(),
        reason: reason.to_string(),
    })
}

/// Frozen set of readers; performs composite reads.
#[derive(Debug)]
pub struct ReaderRegistry {
    handlers: OrderedHandlers<Reader>,
    children: HashMap<NodePath, Vec<NodePath>>,
    nav: Arc<NavigationTable>,
    parallel: bool,
}

impl ReaderRegistry {
    /// Node types with a reader, in dispatch order.
    #[must_use]
    pub fn order(&self) -> Vec<&NodePath> {
        self.handlers.order()
    }

    /// Read the subtree at `path`.
    ///
    /// A wildcarded list path yields an array of every present element
    /// (empty when the device has none). A path below any reader's node
    /// type is served by reading the nearest ancestor with a reader and
    /// navigating down to `path`.
    ///
    /// # Errors
    ///
    /// - [`ReadFailure::Failed`] if a customizer fails.
    /// - [`ReadFailure::NoReader`] if no reader covers `path`.
    /// - [`ReadFailure::Malformed`] if a list other than the last step of
    ///   `path` has no key.
    pub fn read(&self, path: &NodePath, ctx: &ReadContext<'_>) -> Result<Option<Node>, ReadFailure> {
        if path.is_root() {
            let tree = self.read_all(ctx)?;
            return Ok(tree.as_object().is_some_and(|o| !o.is_empty()).then_some(tree));
        }
        self.reject_wildcard_ancestor(path)?;
        let node_type = path.normalize();
        if let Some(registered) = self.handlers.get(&node_type) {
            if let Reader::List(customizer) = &registered.handler
                && path.key().is_none()
            {
                let items = self.read_list(path, customizer.as_ref(), registered, ctx)?;
                return Ok(Some(Node::Array(items)));
            }
            return self.read_node(path, registered, ctx);
        }
        self.read_filtered(path, ctx)
    }

    /// The whole tree: every root reader merged into one object.
    ///
    /// # Errors
    ///
    /// Returns [`ReadFailure::Failed`] if a customizer fails.
    pub fn read_all(&self, ctx: &ReadContext<'_>) -> Result<Node, ReadFailure> {
        let root = NodePath::root();
        let mut builder = NodeBuilder::new();
        self.read_children(&root, &root, &mut builder, ctx)?;
        Ok(builder.build())
    }

    /// Keys of every element of the list at `path`.
    ///
    /// # Errors
    ///
    /// - [`ReadFailure::NoReader`] if no list reader is registered for the type.
    /// - [`ReadFailure::Malformed`] if an enclosing list has no key.
    /// - [`ReadFailure::Failed`] if the customizer fails.
    pub fn list_keys(&self, path: &NodePath, ctx: &ReadContext<'_>) -> Result<Vec<Key>, ReadFailure> {
        self.reject_wildcard_ancestor(path)?;
        let list_path = path.without_key();
        match self.handlers.get(&list_path.normalize()).map(|r| &r.handler) {
            Some(Reader::List(customizer)) => customizer
                .all_ids(&list_path, ctx)
                .map_err(|e| failed(&list_path, e)),
            _ => Err(ReadFailure::NoReader { path: path.clone() }),
        }
    }

    /// Only the last step of a read path may leave a list unkeyed.
    fn reject_wildcard_ancestor(&self, path: &NodePath) -> Result<(), ReadFailure> {
        match path
            .ancestors()
            .find(|ancestor| ancestor.key().is_none() && self.nav.is_list(&ancestor.normalize()))
        {
            Some(list) => Err(ReadFailure::Malformed {
                path: path.clone(),
                reason: format!("cannot address below wildcarded list {list}"),
            }),
            None => Ok(()),
        }
    }

    fn read_filtered(&self, path: &NodePath, ctx: &ReadContext<'_>) -> Result<Option<Node>, ReadFailure> {
        let owner = path.ancestors().find_map(|ancestor| {
            let registered = self.handlers.owner_of(&ancestor.normalize())?;
            Some((path.truncate(registered.node_type.len()), registered))
        });
        let Some((owner_path, registered)) = owner else {
            return Err(ReadFailure::NoReader { path: path.clone() });
        };

        debug!(
            target: "treeconf::read",
            path = %path,
            via = %owner_path,
            "no dedicated reader, filtering ancestor"
        );
        let Some(value) = self.read_node(&owner_path, registered, ctx)? else {
            return Ok(None);
        };
        Ok(self.nav.navigate(&owner_path, &value, path).cloned())
    }

    fn read_node(
        &self,
        path: &NodePath,
        registered: &Registered<Reader>,
        ctx: &ReadContext<'_>,
    ) -> Result<Option<Node>, ReadFailure> {
        trace!(target: "treeconf::read", path = %path, reader = ?registered.handler, "reading node");
        let mut builder = match &registered.handler {
            Reader::Single(c) => c.new_builder(path),
            Reader::List(c) => c.new_builder(path),
            Reader::Structural => NodeBuilder::for_path(path),
        };
        let fresh = builder.clone();

        match registered.handler.traversal_order() {
            TraversalOrder::PreOrder => {
                fill_attributes(&registered.handler, path, &mut builder, ctx)?;
                self.read_children(path, &registered.node_type, &mut builder, ctx)?;
            }
            TraversalOrder::PostOrder => {
                self.read_children(path, &registered.node_type, &mut builder, ctx)?;
                fill_attributes(&registered.handler, path, &mut builder, ctx)?;
            }
        }

        if builder == fresh {
            trace!(target: "treeconf::read", path = %path, "node absent");
            return Ok(None);
        }
        Ok(Some(builder.build()))
    }

    fn read_children(
        &self,
        path: &NodePath,
        node_type: &NodePath,
        builder: &mut NodeBuilder,
        ctx: &ReadContext<'_>,
    ) -> Result<(), ReadFailure> {
        let Some(children) = self.children.get(node_type) else {
            return Ok(());
        };
        for child_type in children {
            let Some(registered) = self.handlers.get(child_type) else {
                continue;
            };
            let Some(name) = child_type.name() else {
                continue;
            };
            let child_path = path.child(name);
            match &registered.handler {
                Reader::List(customizer) => {
                    let items = self.read_list(&child_path, customizer.as_ref(), registered, ctx)?;
                    customizer.merge_list(builder, name, items);
                }
                Reader::Single(customizer) => {
                    if let Some(node) = self.read_node(&child_path, registered, ctx)? {
                        customizer.merge(builder, name, node);
                    }
                }
                Reader::Structural => {
                    if let Some(node) = self.read_node(&child_path, registered, ctx)? {
                        builder.merge_child(name, node);
                    }
                }
            }
        }
        Ok(())
    }

    fn read_list(
        &self,
        list_path: &NodePath,
        customizer: &dyn ListReaderCustomizer,
        registered: &Registered<Reader>,
        ctx: &ReadContext<'_>,
    ) -> Result<Vec<Node>, ReadFailure> {
        let ids = customizer
            .all_ids(list_path, ctx)
            .map_err(|e| failed(list_path, e))?;
        debug!(target: "treeconf::read", path = %list_path, elements = ids.len(), "reading list");

        let read_element = |key: Key| self.read_node(&list_path.with_key(key), registered, ctx);
        let elements: Vec<Option<Node>> = if self.parallel && ids.len() > 1 {
            ids.into_par_iter()
                .map(read_element)
                .collect::<Result<_, _>>()?
        } else {
            ids.into_iter()
                .map(read_element)
                .collect::<Result<_, _>>()?
        };
        Ok(elements.into_iter().flatten().collect())
    }
}

fn fill_attributes(
    reader: &Reader,
    path: &NodePath,
    builder: &mut NodeBuilder,
    ctx: &ReadContext<'_>,
) -> Result<(), ReadFailure> {
    let result = match reader {
        Reader::Single(c) => c.read_current_attributes(path, builder, ctx),
        Reader::List(c) => c.read_current_attributes(path, builder, ctx),
        Reader::Structural => Ok(()),
    };
    result.map_err(|e| failed(path, e))
}

fn failed(path: &NodePath, source: anyhow::Error) -> ReadFailure {
    ReadFailure::Failed {
        path: path.clone(),
        source: source.into(),
    }
}
