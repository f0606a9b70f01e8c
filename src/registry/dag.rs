//! Ordering graph over normalized node types.
//!
//! Every edge insertion is checked for cycles before the graph is touched,
//! so the graph is acyclic at all times and a rejected edge leaves it
//! unchanged.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::error::OrderingConflict;
use crate::path::NodePath;

/// Directed acyclic graph of "must precede" constraints.
///
/// Vertices remember their insertion index, which breaks ties in
/// [`topological_order`](Self::topological_order) so the order is
/// deterministic for a given registration sequence.
#[derive(Debug, Clone, Default)]
pub struct OrderingDag {
    vertices: Vec<NodePath>,
    index: HashMap<NodePath, usize>,
    successors: Vec<BTreeSet<usize>>,
}

impl OrderingDag {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// `true` when the graph has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// `true` when `node_type` is a vertex.
    #[must_use]
    pub fn contains(&self, node_type: &NodePath) -> bool {
        self.index.contains_key(node_type)
    }

    /// Add a vertex if absent, returning its index.
    pub fn add_vertex(&mut self, node_type: &NodePath) -> usize {
        if let Some(&idx) = self.index.get(node_type) {
            return idx;
        }
        let idx = self.vertices.len();
        self.vertices.push(node_type.clone());
        self.index.insert(node_type.clone(), idx);
        self.successors.push(BTreeSet::new());
        idx
    }

    /// Add the constraint "`from` runs before `to`".
    ///
    /// # Errors
    ///
    /// Returns [`OrderingConflict::Cycle`] if the edge would close a cycle
    /// (including a self-edge). The graph is unchanged on error.
    pub fn add_edge(&mut self, from: &NodePath, to: &NodePath) -> Result<(), OrderingConflict> {
        let cycle = || OrderingConflict::Cycle {
            from: from.clone(),
            to: to.clone(),
        };
        if from == to {
            return Err(cycle());
        }
        if let (Some(&f), Some(&t)) = (self.index.get(from), self.index.get(to))
            && self.reaches(t, f)
        {
            return Err(cycle());
        }
        let f = self.add_vertex(from);
        let t = self.add_vertex(to);
        if let Some(succ) = self.successors.get_mut(f) {
            succ.insert(t);
        }
        Ok(())
    }

    /// Depth-first reachability from `start` to `goal`.
    fn reaches(&self, start: usize, goal: usize) -> bool {
        let mut seen = vec![false; self.vertices.len()];
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if idx == goal {
                return true;
            }
            if let Some(flag) = seen.get_mut(idx) {
                if *flag {
                    continue;
                }
                *flag = true;
            }
            if let Some(succ) = self.successors.get(idx) {
                stack.extend(succ.iter().copied());
            }
        }
        false
    }

    /// Kahn's algorithm; among ready vertices the earliest inserted wins.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&NodePath> {
        let mut in_degree = vec![0usize; self.vertices.len()];
        for succ in &self.successors {
            for &t in succ {
                if let Some(d) = in_degree.get_mut(t) {
                    *d += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(Reverse(i)))
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(Reverse(idx)) = ready.pop() {
            if let Some(vertex) = self.vertices.get(idx) {
                order.push(vertex);
            }
            if let Some(succ) = self.successors.get(idx) {
                for &t in succ {
                    if let Some(count) = in_degree.get_mut(t) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(Reverse(t));
                        }
                    }
                }
            }
        }
        order
    }
}
