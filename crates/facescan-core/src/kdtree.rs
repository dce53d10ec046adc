//! KD-tree over face embeddings.
//!
//! Arena-indexed binary tree: nodes live in a growable vector and refer to
//! their children by [`NodeId`]. The split axis cycles round-robin by depth
//! (`child = (parent + 1) mod D`), and every node carries the bounding box
//! of its whole subtree, widened incrementally on insert. Nearest-neighbour
//! search is a depth-first branch-and-bound that prunes any subtree whose box
//! lies farther than the current search radius.

use crate::types::{squared_distance, IdentityId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// 1-based node id. The root always has id [`ROOT_ID`].
pub type NodeId = u32;

pub const ROOT_ID: NodeId = 1;

#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("embedding dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("index dimension must be non-zero")]
    ZeroDimension,
    #[error("embedding record {0} is already indexed")]
    DuplicateRecord(i64),
    #[error("embedding contains a non-finite value")]
    NonFinite,
    #[error("corrupt index: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdNode {
    pub id: NodeId,
    pub split_axis: usize,
    /// Embedding record this node indexes.
    pub record_id: i64,
    pub identity: Option<IdentityId>,
    pub position: Vec<f32>,
    pub min_range: Vec<f32>,
    pub max_range: Vec<f32>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

impl KdNode {
    fn leaf(id: NodeId, split_axis: usize, record_id: i64, identity: Option<IdentityId>, position: &[f32]) -> Self {
        Self {
            id,
            split_axis,
            record_id,
            identity,
            position: position.to_vec(),
            min_range: position.to_vec(),
            max_range: position.to_vec(),
            left: None,
            right: None,
        }
    }

    fn widen(&mut self, point: &[f32]) {
        for ((min, max), &p) in self
            .min_range
            .iter_mut()
            .zip(self.max_range.iter_mut())
            .zip(point)
        {
            *min = min.min(p);
            *max = max.max(p);
        }
    }

    fn encloses(&self, point: &[f32]) -> bool {
        self.min_range
            .iter()
            .zip(&self.max_range)
            .zip(point)
            .all(|((&min, &max), &p)| min <= p && p <= max)
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub record_id: i64,
    pub identity: Option<IdentityId>,
    pub distance: f32,
}

/// Candidate in the bounded result set, ordered by squared distance.
#[derive(Debug)]
struct Candidate {
    sq_distance: f32,
    record_id: i64,
    identity: Option<IdentityId>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sq_distance
            .total_cmp(&other.sq_distance)
            .then(self.record_id.cmp(&other.record_id))
    }
}

#[derive(Debug, Clone)]
pub struct KdTree {
    dimension: usize,
    nodes: Vec<KdNode>,
    by_record: HashMap<i64, NodeId>,
}

impl KdTree {
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self { dimension, nodes: Vec::new(), by_record: HashMap::new() })
    }

    /// Build a tree by inserting `points` in order.
    pub fn build<'a, I>(dimension: usize, points: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (i64, Option<IdentityId>, &'a [f32])>,
    {
        let mut tree = Self::new(dimension)?;
        for (record_id, identity, position) in points {
            tree.insert(record_id, identity, position)?;
        }
        Ok(tree)
    }

    /// Restore a tree from a persisted node arena, validating its links.
    pub fn from_nodes(dimension: usize, mut nodes: Vec<KdNode>) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        nodes.sort_by_key(|n| n.id);

        let count = nodes.len() as NodeId;
        let mut by_record = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let expected_id = i as NodeId + 1;
            if node.id != expected_id {
                return Err(IndexError::Corrupt(format!(
                    "node ids are not contiguous: expected {expected_id}, found {}",
                    node.id
                )));
            }
            for len in [node.position.len(), node.min_range.len(), node.max_range.len()] {
                if len != dimension {
                    return Err(IndexError::DimensionMismatch { expected: dimension, got: len });
                }
            }
            if node.split_axis >= dimension {
                return Err(IndexError::Corrupt(format!(
                    "node {} split axis {} out of range",
                    node.id, node.split_axis
                )));
            }
            for child in [node.left, node.right].into_iter().flatten() {
                if child <= node.id || child > count {
                    return Err(IndexError::Corrupt(format!(
                        "node {} has invalid child link {child}",
                        node.id
                    )));
                }
            }
            if by_record.insert(node.record_id, node.id).is_some() {
                return Err(IndexError::DuplicateRecord(node.record_id));
            }
        }

        Ok(Self { dimension, nodes, by_record })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[KdNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&KdNode> {
        self.nodes.get(slot(id)?)
    }

    pub fn node_for_record(&self, record_id: i64) -> Option<&KdNode> {
        self.by_record.get(&record_id).and_then(|&id| self.node(id))
    }

    fn check_point(&self, point: &[f32]) -> Result<(), IndexError> {
        if point.len() != self.dimension {
            return Err(IndexError::DimensionMismatch { expected: self.dimension, got: point.len() });
        }
        if point.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFinite);
        }
        Ok(())
    }

    /// Insert a point, returning the id of the new node.
    ///
    /// Every node visited on the way down has its box widened to include
    /// `position`, so ancestor boxes always enclose their descendants.
    pub fn insert(
        &mut self,
        record_id: i64,
        identity: Option<IdentityId>,
        position: &[f32],
    ) -> Result<NodeId, IndexError> {
        self.check_point(position)?;
        if self.by_record.contains_key(&record_id) {
            return Err(IndexError::DuplicateRecord(record_id));
        }

        let new_id = self.nodes.len() as NodeId + 1;

        if self.nodes.is_empty() {
            self.nodes.push(KdNode::leaf(ROOT_ID, 0, record_id, identity, position));
            self.by_record.insert(record_id, ROOT_ID);
            return Ok(ROOT_ID);
        }

        let mut current = 0usize;
        let (parent, go_right) = loop {
            let node = &mut self.nodes[current];
            node.widen(position);

            let axis = node.split_axis;
            let go_right = position[axis] >= node.position[axis];
            let next = if go_right { node.right } else { node.left };

            match next {
                Some(child) => current = child as usize - 1,
                None => break (current, go_right),
            }
        };

        let split_axis = (self.nodes[parent].split_axis + 1) % self.dimension;
        self.nodes.push(KdNode::leaf(new_id, split_axis, record_id, identity, position));
        if go_right {
            self.nodes[parent].right = Some(new_id);
        } else {
            self.nodes[parent].left = Some(new_id);
        }
        self.by_record.insert(record_id, new_id);

        Ok(new_id)
    }

    /// Update the identity cached on the node indexing `record_id`.
    /// Returns false when the record is not indexed.
    pub fn set_identity(&mut self, record_id: i64, identity: Option<IdentityId>) -> bool {
        match self.by_record.get(&record_id).copied().and_then(slot) {
            Some(i) => {
                self.nodes[i].identity = identity;
                true
            }
            None => false,
        }
    }

    /// Up to `max_results` points within `radius` of `query`, nearest first.
    ///
    /// The radius shrinks to the worst kept distance once `max_results`
    /// candidates are held, and a child subtree is only entered while the
    /// lower bound to its box is within the current radius.
    pub fn nearest_neighbors(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.check_point(query)?;
        if self.nodes.is_empty() || max_results == 0 || radius.is_nan() || radius < 0.0 {
            return Ok(Vec::new());
        }

        let mut sq_radius = radius * radius;
        let mut best: BinaryHeap<Candidate> = BinaryHeap::with_capacity(max_results + 1);

        // Explicit stack: degenerate insertion orders produce deep trees.
        let mut stack: Vec<(usize, f32)> = vec![(0, 0.0)];

        while let Some((i, lower_bound)) = stack.pop() {
            if lower_bound > sq_radius {
                continue;
            }
            let node = &self.nodes[i];

            let d2 = squared_distance(query, &node.position);
            if d2 <= sq_radius {
                best.push(Candidate { sq_distance: d2, record_id: node.record_id, identity: node.identity });
                if best.len() > max_results {
                    best.pop();
                }
                if best.len() == max_results {
                    if let Some(worst) = best.peek() {
                        sq_radius = worst.sq_distance;
                    }
                }
            }

            let left = node.left.map(|c| {
                let c = c as usize - 1;
                (c, self.box_distance_sq(c, query))
            });
            let right = node.right.map(|c| {
                let c = c as usize - 1;
                (c, self.box_distance_sq(c, query))
            });

            // Push the farther child first so the nearer one is explored first.
            match (left, right) {
                (Some(l), Some(r)) => {
                    let (near, far) = if l.1 <= r.1 { (l, r) } else { (r, l) };
                    if far.1 <= sq_radius {
                        stack.push(far);
                    }
                    if near.1 <= sq_radius {
                        stack.push(near);
                    }
                }
                (Some(only), None) | (None, Some(only)) => {
                    if only.1 <= sq_radius {
                        stack.push(only);
                    }
                }
                (None, None) => {}
            }
        }

        Ok(best
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor { record_id: c.record_id, identity: c.identity, distance: c.sq_distance.sqrt() })
            .collect())
    }

    /// Squared distance from `query` to the bounding box of node slot `i`.
    fn box_distance_sq(&self, i: usize, query: &[f32]) -> f32 {
        let node = &self.nodes[i];
        node.min_range
            .iter()
            .zip(&node.max_range)
            .zip(query)
            .map(|((&min, &max), &q)| {
                let below = (min - q).max(0.0);
                let above = (q - max).max(0.0);
                below * below + above * above
            })
            .sum()
    }

    /// Check the structural invariants: split axes cycle by depth, children
    /// sit on the correct side of their parent's split, and every node's box
    /// encloses all points of its subtree.
    pub fn verify(&self) -> Result<(), IndexError> {
        for node in &self.nodes {
            for (child, is_right) in [(node.left, false), (node.right, true)] {
                let Some(child) = child.and_then(|c| self.node(c)) else {
                    continue;
                };
                if child.split_axis != (node.split_axis + 1) % self.dimension {
                    return Err(IndexError::Corrupt(format!(
                        "node {} split axis {} does not follow parent {}",
                        child.id, child.split_axis, node.id
                    )));
                }
                let axis = node.split_axis;
                let on_right = child.position[axis] >= node.position[axis];
                if on_right != is_right {
                    return Err(IndexError::Corrupt(format!(
                        "node {} is on the wrong side of node {}",
                        child.id, node.id
                    )));
                }
            }

            let mut pending = vec![node.id];
            while let Some(id) = pending.pop() {
                let Some(descendant) = self.node(id) else {
                    return Err(IndexError::Corrupt(format!("dangling child link {id}")));
                };
                if !node.encloses(&descendant.position) {
                    return Err(IndexError::Corrupt(format!(
                        "node {} box does not enclose descendant {}",
                        node.id, descendant.id
                    )));
                }
                pending.extend(descendant.left);
                pending.extend(descendant.right);
            }
        }
        Ok(())
    }
}

fn slot(id: NodeId) -> Option<usize> {
    (id as usize).checked_sub(1)
}
