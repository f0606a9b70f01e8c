//! Dynamic tree values and the builder customizers fill in.
//!
//! Tree data is carried as [`serde_json::Value`]: containers are objects,
//! lists are arrays of objects, leaves are scalars. A [`NodeBuilder`] is the
//! mutable object a reader assembles before it is frozen into a [`Node`].
use serde_json::{Map, Value};

use crate::path::{Key, NodePath};

/// One node of the configuration tree.
pub type Node = Value;

/// Render a scalar leaf as the string used in path keys.
///
/// Returns `None` for objects, arrays and `null`.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Mutable container node under construction.
///
/// Two builders compare equal when they hold the same fields, which is how
/// the composite reader decides that nothing was read for a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeBuilder {
    fields: Map<String, Value>,
}

impl NodeBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-populated with the key leaves of the path's final step.
    ///
    /// # Examples
    ///
    /// ```
    /// use treeconf::data::NodeBuilder;
    /// use treeconf::path::NodePath;
    ///
    /// let path: NodePath = "/interfaces/interface[name=eth0]".parse().unwrap();
    /// let builder = NodeBuilder::for_path(&path);
    /// assert_eq!(builder.get("name"), Some(&serde_json::json!("eth0")));
    /// ```
    #[must_use]
    pub fn for_path(path: &NodePath) -> Self {
        path.key().map_or_else(Self::new, Self::with_key)
    }

    /// Builder holding the leaves of `key` as string values.
    #[must_use]
    pub fn with_key(key: &Key) -> Self {
        let mut builder = Self::new();
        for (leaf, value) in key.iter() {
            builder.set(leaf, Value::String(value.to_string()));
        }
        builder
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Current value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Store a child container under `name`.
    pub fn merge_child(&mut self, name: &str, node: Node) {
        self.fields.insert(name.to_string(), node);
    }

    /// Append list elements under `name`.
    ///
    /// An empty `items` leaves the builder untouched so that a container
    /// holding only empty lists still reads as absent.
    pub fn merge_list(&mut self, name: &str, items: Vec<Node>) {
        if items.is_empty() {
            return;
        }
        match self.fields.get_mut(name) {
            Some(Value::Array(existing)) => existing.extend(items),
            _ => {
                self.fields.insert(name.to_string(), Value::Array(items));
            }
        }
    }

    /// Freeze the builder into a [`Node`].
    #[must_use]
    pub fn build(self) -> Node {
        Value::Object(self.fields)
    }
}
