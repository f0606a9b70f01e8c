//! Schema description and the navigation table derived from it.
//!
//! Schema loading is external; callers describe the shape the engine needs
//! (which node types are lists and what their key leaves are) with
//! [`Schema`]. [`NavigationTable`] is built from it once and answers every
//! structural question the reader and writer ask at runtime: how to step
//! from a node into a child, how to find a list element by key, and how to
//! enumerate every concrete instance of a node type inside a subtree.
use std::collections::HashMap;

use serde_json::Value;

use crate::data::{Node, scalar_text};
use crate::path::{Key, NodePath, PathStep};

/// Shape of a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Object node addressed by name.
    Container,
    /// Array of object nodes, each identified by its key leaves.
    List {
        /// Key leaf names, in key order.
        keys: Vec<String>,
    },
}

/// Declared node types, keyed by normalized path.
///
/// Types that are not declared are treated as containers.
///
/// # Examples
///
/// ```
/// use treeconf::schema::Schema;
///
/// let schema = Schema::new()
///     .container("/interfaces".parse().unwrap())
///     .list("/interfaces/interface".parse().unwrap(), &["name"]);
/// assert!(schema.is_list(&"/interfaces/interface".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    nodes: HashMap<NodePath, NodeKind>,
}

impl Schema {
    /// Empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a container type.
    #[must_use]
    pub fn container(mut self, node_type: NodePath) -> Self {
        self.nodes.insert(node_type.normalize(), NodeKind::Container);
        self
    }

    /// Declare a list type with its key leaves.
    #[must_use]
    pub fn list(mut self, node_type: NodePath, keys: &[&str]) -> Self {
        self.nodes.insert(
            node_type.normalize(),
            NodeKind::List {
                keys: keys.iter().map(ToString::to_string).collect(),
            },
        );
        self
    }

    /// Declared kind of a normalized type.
    #[must_use]
    pub fn kind(&self, node_type: &NodePath) -> Option<&NodeKind> {
        self.nodes.get(node_type)
    }

    /// `true` when the normalized type is declared as a list.
    #[must_use]
    pub fn is_list(&self, node_type: &NodePath) -> bool {
        matches!(self.kind(node_type), Some(NodeKind::List { .. }))
    }
}

/// How to step from a parent node into one child type.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StepAccessor {
    field: String,
    list_keys: Option<Vec<String>>,
}

/// Error raised while navigating data with the navigation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationError {
    /// Path of the offending node.
    pub path: NodePath,
    /// What is wrong with the data.
    pub reason: String,
}

/// Step accessors for every declared type, built once from a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct NavigationTable {
    accessors: HashMap<NodePath, StepAccessor>,
}

impl NavigationTable {
    /// Build the table for every type declared in `schema`.
    #[must_use]
    pub fn build(schema: &Schema) -> Self {
        let accessors = schema
            .nodes
            .iter()
            .filter_map(|(node_type, kind)| {
                let field = node_type.name()?.to_string();
                let list_keys = match kind {
                    NodeKind::Container => None,
                    NodeKind::List { keys } => Some(keys.clone()),
                };
                Some((node_type.clone(), StepAccessor { field, list_keys }))
            })
            .collect();
        Self { accessors }
    }

    fn accessor(&self, node_type: &NodePath) -> StepAccessor {
        self.accessors
            .get(node_type)
            .cloned()
            .unwrap_or_else(|| StepAccessor {
                field: node_type.name().unwrap_or_default().to_string(),
                list_keys: None,
            })
    }

    /// `true` when the normalized type is a list.
    #[must_use]
    pub fn is_list(&self, node_type: &NodePath) -> bool {
        self.accessors
            .get(node_type)
            .is_some_and(|a| a.list_keys.is_some())
    }

    /// Key leaf names of a list type.
    #[must_use]
    pub fn list_keys(&self, node_type: &NodePath) -> Option<&[String]> {
        self.accessors
            .get(node_type)
            .and_then(|a| a.list_keys.as_deref())
    }

    /// Key of a list element, read from its key leaves.
    ///
    /// # Errors
    ///
    /// Returns an error if a key leaf is missing or not a scalar.
    pub fn element_key(
        &self,
        list_path: &NodePath,
        element: &Node,
    ) -> Result<Key, NavigationError> {
        let keys = self.list_keys(&list_path.normalize()).unwrap_or_default();
        let mut pairs = Vec::with_capacity(keys.len());
        for leaf in keys {
            let value = element
                .get(leaf)
                .and_then(scalar_text)
                .ok_or_else(|| NavigationError {
                    path: list_path.clone(),
                    reason: format!("list element is missing key leaf '{leaf}'"),
                })?;
            pairs.push((leaf.clone(), value));
        }
        Ok(Key::from_pairs(pairs))
    }

    /// Step from `value` (the node at `parent`) into `step`.
    ///
    /// A keyed list step selects the matching element; an unkeyed list
    /// step yields the whole array.
    #[must_use]
    pub fn child<'a>(&self, parent: &NodePath, value: &'a Node, step: &PathStep) -> Option<&'a Node> {
        let accessor = self.accessor(&parent.normalize().child(step.name.clone()));
        let field = value.get(&accessor.field)?;
        match (&accessor.list_keys, &step.key) {
            (Some(_), Some(key)) => field
                .as_array()?
                .iter()
                .find(|element| element_matches(element, key)),
            _ => Some(field),
        }
    }

    /// Navigate from `value` at `base` down to `target`.
    ///
    /// Returns `None` when `target` is not under `base` or the data has no
    /// node there.
    #[must_use]
    pub fn navigate<'a>(&self, base: &NodePath, value: &'a Node, target: &NodePath) -> Option<&'a Node> {
        let rel = target.relative_to(base)?;
        let mut current = value;
        let mut at = base.clone();
        for step in rel {
            if current.is_array() {
                // An unkeyed list step can only be the final one.
                return None;
            }
            current = self.child(&at, current, step)?;
            at = step_into(&at, step);
        }
        Some(current)
    }

    /// Every concrete instance of `node_type` inside `value` (the node at
    /// `base`), with its keyed path.
    ///
    /// `node_type` must be `base`'s type or a descendant of it. When `base`
    /// is an unkeyed list path, `value` is the list's array.
    ///
    /// # Errors
    ///
    /// Returns an error if a list is not an array or an element lacks a key
    /// leaf.
    pub fn instances(
        &self,
        base: &NodePath,
        value: &Node,
        node_type: &NodePath,
    ) -> Result<Vec<(NodePath, Node)>, NavigationError> {
        let base_type = base.normalize();
        let Some(rel) = node_type.relative_to(&base_type) else {
            return Ok(Vec::new());
        };

        let mut current: Vec<(NodePath, &Node)> = Vec::new();
        if self.is_list(&base_type) && base.key().is_none() {
            for element in as_list(base, value)? {
                let key = self.element_key(base, element)?;
                current.push((base.with_key(key), element));
            }
        } else {
            current.push((base.clone(), value));
        }

        for step in rel {
            let mut next = Vec::new();
            for (path, node) in current {
                let child_type = path.normalize().child(step.name.clone());
                let accessor = self.accessor(&child_type);
                let Some(field) = node.get(&accessor.field) else {
                    continue;
                };
                if accessor.list_keys.is_some() {
                    let list_path = path.child(step.name.clone());
                    for element in as_list(&list_path, field)? {
                        let key = self.element_key(&list_path, element)?;
                        next.push((list_path.with_key(key), element));
                    }
                } else {
                    next.push((path.child(step.name.clone()), field));
                }
            }
            current = next;
        }

        Ok(current
            .into_iter()
            .map(|(path, node)| (path, node.clone()))
            .collect())
    }
}

fn step_into(path: &NodePath, step: &PathStep) -> NodePath {
    step.key.as_ref().map_or_else(
        || path.child(step.name.clone()),
        |key| path.keyed_child(step.name.clone(), key.clone()),
    )
}

fn as_list<'a>(path: &NodePath, value: &'a Node) -> Result<&'a Vec<Value>, NavigationError> {
    value.as_array().ok_or_else(|| NavigationError {
        path: path.clone(),
        reason: "expected a list".to_string(),
    })
}

fn element_matches(element: &Node, key: &Key) -> bool {
    key.iter()
        .all(|(leaf, expected)| element.get(leaf).and_then(scalar_text).as_deref() == Some(expected))
}

/// Remove the subtree at `rel` (a path relative to `value`) from every
/// element it reaches, descending through lists.
pub fn strip_subtree(value: &mut Node, rel: &[PathStep]) {
    match rel {
        [] => {}
        [last] => {
            if let Some(object) = value.as_object_mut() {
                object.remove(&last.name);
            }
        }
        [first, rest @ ..] => match value.get_mut(&first.name) {
            Some(Value::Array(elements)) => {
                for element in elements {
                    strip_subtree(element, rest);
                }
            }
            Some(child) => strip_subtree(child, rest),
            None => {}
        },
    }
}
