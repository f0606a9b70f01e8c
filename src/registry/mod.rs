//! Dependency-ordered handler registry.
//!
//! Handlers are registered once per normalized node type together with
//! "must run before / after" relations to other types. The relations form
//! an [`OrderingDag`]; every registration is validated before anything is
//! stored, so a failed call leaves the registry exactly as it was.
//! [`HandlerRegistry::build`] freezes the registry into
//! [`OrderedHandlers`], the dispatch order used by readers and writers.
//!
//! # Examples
//!
//! ```
//! use treeconf::registry::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! registry
//!     .add_before("/gpe-feature".parse().unwrap(), "h1", &"/interfaces".parse().unwrap())
//!     .unwrap();
//! registry.add("/interfaces".parse().unwrap(), "h2").unwrap();
//!
//! let ordered = registry.build();
//! let handlers: Vec<_> = ordered.iter().map(|r| r.handler).collect();
//! assert_eq!(handlers, ["h1", "h2"]);
//! ```
pub mod dag;

use std::collections::HashMap;

use tracing::debug;

pub use dag::OrderingDag;

use crate::error::OrderingConflict;
use crate::path::NodePath;

/// Ordering relations and subtree claims of one registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations {
    /// Types the handler must run before.
    pub before: Vec<NodePath>,
    /// Types the handler must run after.
    pub after: Vec<NodePath>,
    /// Descendant types the handler also owns.
    pub subtree: Vec<NodePath>,
}

impl Relations {
    /// No relations and no subtree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type this handler must run before.
    #[must_use]
    pub fn before(mut self, node_type: NodePath) -> Self {
        self.before.push(node_type);
        self
    }

    /// Add a type this handler must run after.
    #[must_use]
    pub fn after(mut self, node_type: NodePath) -> Self {
        self.after.push(node_type);
        self
    }

    /// Claim descendant types for this handler.
    #[must_use]
    pub fn subtree(mut self, children: impl IntoIterator<Item = NodePath>) -> Self {
        self.subtree.extend(children);
        self
    }
}

/// A handler bound to its node type.
#[derive(Debug, Clone)]
pub struct Registered<H> {
    /// Normalized node type.
    pub node_type: NodePath,
    /// The handler.
    pub handler: H,
    /// Descendant types the handler owns (empty for plain handlers).
    pub subtree: Vec<NodePath>,
}

impl<H> Registered<H> {
    /// `true` when this registration handles `node_type`, either directly
    /// or as part of its subtree. Descendants of an owned type are owned too.
    #[must_use]
    pub fn covers(&self, node_type: &NodePath) -> bool {
        &self.node_type == node_type || self.owns(node_type)
    }

    /// `true` when `node_type` lies inside the declared subtree.
    #[must_use]
    pub fn owns(&self, node_type: &NodePath) -> bool {
        self.subtree.iter().any(|child| node_type.starts_with(child))
    }

    /// `true` when this is a subtree handler.
    #[must_use]
    pub fn is_subtree(&self) -> bool {
        !self.subtree.is_empty()
    }
}

/// Registry of handlers of type `H` under construction.
#[derive(Debug)]
pub struct HandlerRegistry<H> {
    dag: OrderingDag,
    handlers: HashMap<NodePath, Registered<H>>,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            dag: OrderingDag::new(),
            handlers: HashMap::new(),
        }
    }
}

impl<H> HandlerRegistry<H> {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when a handler is bound to the normalized type.
    #[must_use]
    pub fn contains(&self, node_type: &NodePath) -> bool {
        self.handlers.contains_key(&node_type.normalize())
    }

    /// Number of bound handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when no handler is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Bound registrations, in no particular order.
    pub fn registered(&self) -> impl Iterator<Item = &Registered<H>> {
        self.handlers.values()
    }

    /// Bound types that are descendants of `node_type`.
    pub fn descendants_of<'a>(&'a self, node_type: &'a NodePath) -> impl Iterator<Item = &'a NodePath> + 'a {
        self.handlers
            .keys()
            .filter(move |t| node_type.is_ancestor_of(t))
    }

    /// `true` when some subtree handler owns `node_type` or one of its
    /// ancestors.
    #[must_use]
    pub fn is_claimed(&self, node_type: &NodePath) -> bool {
        let node_type = node_type.normalize();
        self.handlers.values().any(|r| r.owns(&node_type))
    }

    /// Register a handler with explicit relations.
    ///
    /// Paths are normalized before use. All checks run before the registry
    /// is touched.
    ///
    /// # Errors
    ///
    /// - [`OrderingConflict::Duplicate`] if the type already has a handler.
    /// - [`OrderingConflict::InvalidSubtree`] if a subtree type is not a
    ///   strict descendant of `node_type`.
    /// - [`OrderingConflict::Cycle`] if a relation would close a cycle.
    pub fn register(
        &mut self,
        node_type: NodePath,
        handler: H,
        relations: Relations,
    ) -> Result<&mut Self, OrderingConflict> {
        let node_type = node_type.normalize();
        if self.handlers.contains_key(&node_type) {
            return Err(OrderingConflict::Duplicate { node_type });
        }

        let Relations {
            before,
            after,
            subtree,
        } = relations;
        let subtree: Vec<NodePath> = subtree.into_iter().map(|c| c.normalize()).collect();
        if let Some(child) = subtree.iter().find(|c| !node_type.is_ancestor_of(c)) {
            return Err(OrderingConflict::InvalidSubtree {
                node_type,
                child: child.clone(),
            });
        }

        let mut dag = self.dag.clone();
        dag.add_vertex(&node_type);
        for other in &before {
            dag.add_edge(&node_type, &other.normalize())?;
        }
        for other in &after {
            dag.add_edge(&other.normalize(), &node_type)?;
        }

        debug!(
            target: "treeconf::registry",
            node_type = %node_type,
            before = before.len(),
            after = after.len(),
            subtree = subtree.len(),
            "registered handler"
        );
        self.dag = dag;
        self.handlers.insert(
            node_type.clone(),
            Registered {
                node_type,
                handler,
                subtree,
            },
        );
        Ok(self)
    }

    /// Register a handler with no ordering constraints.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn add(&mut self, node_type: NodePath, handler: H) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, handler, Relations::new())
    }

    /// Register a handler that must run before `related`.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn add_before(
        &mut self,
        node_type: NodePath,
        handler: H,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, handler, Relations::new().before(related.clone()))
    }

    /// Register a handler that must run after `related`.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn add_after(
        &mut self,
        node_type: NodePath,
        handler: H,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, handler, Relations::new().after(related.clone()))
    }

    /// Register a subtree handler that also owns `children`.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn subtree_add(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        handler: H,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(node_type, handler, Relations::new().subtree(children))
    }

    /// Register a subtree handler that must run before `related`.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn subtree_add_before(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        handler: H,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(
            node_type,
            handler,
            Relations::new().subtree(children).before(related.clone()),
        )
    }

    /// Register a subtree handler that must run after `related`.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn subtree_add_after(
        &mut self,
        children: impl IntoIterator<Item = NodePath>,
        node_type: NodePath,
        handler: H,
        related: &NodePath,
    ) -> Result<&mut Self, OrderingConflict> {
        self.register(
            node_type,
            handler,
            Relations::new().subtree(children).after(related.clone()),
        )
    }

    /// Freeze the registry into dispatch order.
    ///
    /// Types referenced only as relation targets are dropped, as are
    /// handlers whose type is owned by a subtree handler, including types
    /// below an owned type.
    #[must_use]
    pub fn build(mut self) -> OrderedHandlers<H> {
        let claimed: Vec<NodePath> = self
            .handlers
            .values()
            .flat_map(|r| r.subtree.iter().cloned())
            .collect();

        let mut entries = Vec::with_capacity(self.handlers.len());
        for node_type in self.dag.topological_order() {
            let Some(registered) = self.handlers.remove(node_type) else {
                continue;
            };
            if claimed.iter().any(|owned| node_type.starts_with(owned)) {
                debug!(
                    target: "treeconf::registry",
                    node_type = %node_type,
                    "handler superseded by subtree owner"
                );
                continue;
            }
            entries.push(registered);
        }
        OrderedHandlers { entries }
    }
}

/// Handlers in dispatch order, as produced by [`HandlerRegistry::build`].
#[derive(Debug, Clone)]
pub struct OrderedHandlers<H> {
    entries: Vec<Registered<H>>,
}

impl<H> Default for OrderedHandlers<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> OrderedHandlers<H> {
    /// Iterate over registrations in dispatch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Registered<H>> {
        self.entries.iter()
    }

    /// Node types in dispatch order.
    #[must_use]
    pub fn order(&self) -> Vec<&NodePath> {
        self.entries.iter().map(|r| &r.node_type).collect()
    }

    /// Number of dispatchable handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing can be dispatched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registration bound directly to `node_type`.
    #[must_use]
    pub fn get(&self, node_type: &NodePath) -> Option<&Registered<H>> {
        self.entries.iter().find(|r| &r.node_type == node_type)
    }

    /// Registration that handles `node_type`, directly or via a subtree.
    #[must_use]
    pub fn owner_of(&self, node_type: &NodePath) -> Option<&Registered<H>> {
        self.entries.iter().find(|r| r.covers(node_type))
    }

    /// Position of the registration in dispatch order.
    #[must_use]
    pub fn position(&self, node_type: &NodePath) -> Option<usize> {
        self.entries.iter().position(|r| &r.node_type == node_type)
    }
}

impl<'a, H> IntoIterator for &'a OrderedHandlers<H> {
    type Item = &'a Registered<H>;
    type IntoIter = std::slice::Iter<'a, Registered<H>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    fn order<H>(built: &OrderedHandlers<H>) -> Vec<String> {
        built.order().into_iter().map(ToString::to_string).collect()
    }

    #[test]
    fn before_relation_orders_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.add(path("/interfaces"), 2).unwrap();
        registry
            .add_before(path("/gpe-feature"), 1, &path("/interfaces"))
            .unwrap();
        assert_eq!(order(&registry.build()), vec!["/gpe-feature", "/interfaces"]);
    }

    #[test]
    fn after_relation_orders_handlers() {
        let mut registry = HandlerRegistry::new();
        registry
            .add_after(path("/routes"), "r", &path("/interfaces"))
            .unwrap();
        registry.add(path("/interfaces"), "i").unwrap();
        assert_eq!(order(&registry.build()), vec!["/interfaces", "/routes"]);
    }

    #[test]
    fn keyed_paths_are_normalized() {
        let mut registry = HandlerRegistry::new();
        registry
            .add(path("/interfaces/interface[name=eth0]"), ())
            .unwrap();
        assert!(registry.contains(&path("/interfaces/interface")));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.add(path("/a"), 1).unwrap();
        let err = registry.add(path("/a"), 2).unwrap_err();
        assert_eq!(err, OrderingConflict::Duplicate { node_type: path("/a") });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cycle_leaves_registry_unchanged() {
        let mut registry = HandlerRegistry::new();
        registry.add_before(path("/a"), "a", &path("/b")).unwrap();
        registry.add_before(path("/b"), "b", &path("/c")).unwrap();
        let err = registry
            .register(
                path("/c"),
                "c",
                Relations::new().before(path("/x")).before(path("/a")),
            )
            .unwrap_err();
        assert!(matches!(err, OrderingConflict::Cycle { .. }));
        assert!(!registry.contains(&path("/c")));

        // The partially applied edge to /x was discarded with the rest.
        registry.add(path("/c"), "c").unwrap();
        registry.add_before(path("/x"), "x", &path("/a")).unwrap();
        assert_eq!(order(&registry.build()), vec!["/x", "/a", "/b", "/c"]);
    }

    #[test]
    fn relation_anchors_are_not_dispatched() {
        let mut registry = HandlerRegistry::new();
        registry.add_after(path("/b"), "b", &path("/anchor")).unwrap();
        let built = registry.build();
        assert_eq!(order(&built), vec!["/b"]);
    }

    #[test]
    fn subtree_must_claim_descendants() {
        let mut registry: HandlerRegistry<()> = HandlerRegistry::new();
        let err = registry
            .subtree_add([path("/other/leaf")], path("/a"), ())
            .unwrap_err();
        assert!(matches!(err, OrderingConflict::InvalidSubtree { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn subtree_handler_supersedes_claimed_types() {
        let mut registry = HandlerRegistry::new();
        registry.add(path("/a/b"), "inner").unwrap();
        registry
            .subtree_add([path("/a/b")], path("/a"), "owner")
            .unwrap();
        let built = registry.build();
        assert_eq!(order(&built), vec!["/a"]);
        assert_eq!(built.owner_of(&path("/a/b")).unwrap().handler, "owner");
        assert!(built.get(&path("/a/b")).is_none());
    }

    #[test]
    fn types_below_a_claimed_type_are_superseded() {
        let mut registry = HandlerRegistry::new();
        registry
            .subtree_add([path("/a/b")], path("/a"), "owner")
            .unwrap();
        registry.add(path("/a/b/c"), "deep").unwrap();
        registry.add(path("/a/d"), "sibling").unwrap();
        assert!(registry.is_claimed(&path("/a/b/c")));
        assert!(!registry.is_claimed(&path("/a/d")));

        let built = registry.build();
        assert_eq!(order(&built), vec!["/a", "/a/d"]);
        assert_eq!(built.owner_of(&path("/a/b/c")).unwrap().handler, "owner");
    }

    #[test]
    fn descendants_lists_bound_children() {
        let mut registry = HandlerRegistry::new();
        registry.add(path("/a"), 0).unwrap();
        registry.add(path("/a/b"), 1).unwrap();
        registry.add(path("/c"), 2).unwrap();
        let root = path("/a");
        let found: Vec<_> = registry.descendants_of(&root).collect();
        assert_eq!(found, vec![&path("/a/b")]);
    }
}
