//! Typed, optionally keyed locations in the configuration tree.
//!
//! A [`NodePath`] is written as `/step/step[key=value,key=value]/step`.
//! Keyed steps address one element of a list; an unkeyed list step denotes
//! every element of that list. Registries match handlers on the
//! [normalized](NodePath::normalize) form, which has every key stripped.
//!
//! # Examples
//!
//! ```
//! use treeconf::path::NodePath;
//!
//! let path: NodePath = "/interfaces/interface[name=eth0]/mtu".parse().unwrap();
//! assert_eq!(path.len(), 3);
//! assert_eq!(path.normalize().to_string(), "/interfaces/interface/mtu");
//! ```
use std::fmt;
use std::str::FromStr;

use crate::error::PathError;

/// Key of one list element: ordered `(leaf, value)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Key(Vec<(String, String)>);

impl Key {
    /// Key with a single leaf.
    #[must_use]
    pub fn single(leaf: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![(leaf.into(), value.into())])
    }

    /// Build a key from `(leaf, value)` pairs, keeping their order.
    #[must_use]
    pub fn from_pairs<I, L, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, V)>,
        L: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(l, v)| (l.into(), v.into()))
                .collect(),
        )
    }

    /// Value of the given key leaf.
    #[must_use]
    pub fn get(&self, leaf: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(l, _)| l == leaf)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(leaf, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    /// `true` when the key has no leaves.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (leaf, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{leaf}={value}")?;
        }
        f.write_str("]")
    }
}

/// One step of a [`NodePath`]: a node name plus an optional list key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathStep {
    /// Node name (field name in the data tree).
    pub name: String,
    /// List element key; `None` for containers and wildcarded lists.
    pub key: Option<Key>,
}

impl PathStep {
    /// Unkeyed step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// Keyed list step.
    #[must_use]
    pub fn keyed(name: impl Into<String>, key: Key) -> Self {
        Self {
            name: name.into(),
            key: Some(key),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Ordered sequence of [`PathStep`]s from the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath {
    steps: Vec<PathStep>,
}

impl NodePath {
    /// The tree root (`/`).
    #[must_use]
    pub const fn root() -> Self {
        Self { steps: Vec::new() }
    }

    /// Build a path from steps.
    #[must_use]
    pub const fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// The steps of this path, root first.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` for the root path.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// `true` when the path is empty; alias of [`is_root`](Self::is_root).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Final step, `None` for the root.
    #[must_use]
    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// Name of the final step, `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.last().map(|s| s.name.as_str())
    }

    /// Key of the final step, if it is keyed.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.last().and_then(|s| s.key.as_ref())
    }

    /// Copy of this path with every key stripped.
    #[must_use]
    pub fn normalize(&self) -> Self {
        Self {
            steps: self
                .steps
                .iter()
                .map(|s| PathStep::new(s.name.clone()))
                .collect(),
        }
    }

    /// `true` when no step carries a key.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.steps.iter().all(|s| s.key.is_none())
    }

    /// Append an unkeyed step.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::new(name));
        Self { steps }
    }

    /// Append a keyed step.
    #[must_use]
    pub fn keyed_child(&self, name: impl Into<String>, key: Key) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::keyed(name, key));
        Self { steps }
    }

    /// Replace the key of the final step. The root is returned unchanged.
    #[must_use]
    pub fn with_key(&self, key: Key) -> Self {
        let mut steps = self.steps.clone();
        if let Some(last) = steps.last_mut() {
            last.key = Some(key);
        }
        Self { steps }
    }

    /// Copy of this path with the key of the final step removed.
    #[must_use]
    pub fn without_key(&self) -> Self {
        let mut steps = self.steps.clone();
        if let Some(last) = steps.last_mut() {
            last.key = None;
        }
        Self { steps }
    }

    /// Path without its final step; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(self.truncate(self.steps.len() - 1))
    }

    /// The first `len` steps of this path.
    #[must_use]
    pub fn truncate(&self, len: usize) -> Self {
        Self {
            steps: self.steps.iter().take(len).cloned().collect(),
        }
    }

    /// Proper ancestors from the nearest to the outermost (root excluded).
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..self.steps.len()).rev().map(|len| self.truncate(len))
    }

    /// `true` when `prefix` is equal to, or an ancestor of, this path.
    ///
    /// Steps are compared by name; a step of `prefix` without a key matches
    /// any key, so a normalized prefix matches every concrete descendant.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        prefix.steps.len() <= self.steps.len()
            && prefix
                .steps
                .iter()
                .zip(&self.steps)
                .all(|(p, s)| p.name == s.name && (p.key.is_none() || p.key == s.key))
    }

    /// `true` when `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.steps.len() < other.steps.len() && other.starts_with(self)
    }

    /// Steps of this path below `ancestor`, or `None` if it is not a prefix.
    #[must_use]
    pub fn relative_to(&self, ancestor: &Self) -> Option<&[PathStep]> {
        if self.starts_with(ancestor) {
            self.steps.get(ancestor.steps.len()..)
        } else {
            None
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("/");
        }
        for step in &self.steps {
            write!(f, "/{step}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PathError {
            path: s.to_string(),
            reason: reason.to_string(),
        };
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| invalid("path must start with '/'"))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut steps = Vec::new();
        for raw in split_steps(rest).map_err(|reason| invalid(&reason))? {
            steps.push(parse_step(raw).map_err(|reason| invalid(&reason))?);
        }
        Ok(Self { steps })
    }
}

/// Split on `/` outside of key brackets; key values may contain `/`
/// (e.g. IP prefixes).
fn split_steps(s: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ']'".to_string())?;
            }
            '/' if depth == 0 => {
                parts.push(s.get(start..i).unwrap_or_default());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '['".to_string());
    }
    parts.push(s.get(start..).unwrap_or_default());
    Ok(parts)
}

fn parse_step(raw: &str) -> Result<PathStep, String> {
    let Some(open) = raw.find('[') else {
        if raw.is_empty() {
            return Err("empty step".to_string());
        }
        return Ok(PathStep::new(raw));
    };
    let name = raw.get(..open).unwrap_or_default();
    if name.is_empty() {
        return Err("empty step name".to_string());
    }
    let body = raw
        .get(open + 1..)
        .and_then(|b| b.strip_suffix(']'))
        .ok_or_else(|| format!("step '{raw}' has trailing text after its key"))?;

    let mut pairs = Vec::new();
    for pair in body.split(',') {
        let (leaf, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("key part '{pair}' is not leaf=value"))?;
        if leaf.is_empty() {
            return Err(format!("key part '{pair}' has an empty leaf name"));
        }
        pairs.push((leaf.to_string(), value.to_string()));
    }
    Ok(PathStep::keyed(name, Key(pairs)))
}
