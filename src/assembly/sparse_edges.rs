//! Compact bidirected adjacency for degree-≤1-dominated graphs.
//!
//! Most nodes of a long-read de Bruijn graph have exactly one outgoing edge
//! per direction, so the first edge of every directed node is stored inline
//! in a flat array and only the rare extra edges spill into a side map.

use ahash::AHashMap;

use crate::core::bidirected::{NodePos, StrandVec};

#[derive(Debug)]
pub struct SparseEdgeContainer {
    first_edge: StrandVec<Option<NodePos>>,
    extra_edges: AHashMap<NodePos, Vec<NodePos>>,
}

impl SparseEdgeContainer {
    pub fn new(size: usize) -> Self {
        Self {
            first_edge: StrandVec::with_default(size),
            extra_edges: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.first_edge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_edge.is_empty()
    }

    pub fn add_edge(&mut self, from: NodePos, to: NodePos) {
        match self.first_edge[from] {
            None => self.first_edge[from] = Some(to),
            Some(existing) if existing == to => {}
            Some(_) => {
                let extras = self.extra_edges.entry(from).or_default();
                if !extras.contains(&to) {
                    extras.push(to);
                }
            }
        }
    }

    /// All outgoing edges of a directed node.
    pub fn edges(&self, from: NodePos) -> Vec<NodePos> {
        let Some(first) = self.first_edge[from] else {
            return Vec::new();
        };
        let mut result = vec![first];
        if let Some(extras) = self.extra_edges.get(&from) {
            result.extend_from_slice(extras);
        }
        result
    }

    /// Out-degree of a directed node without materializing the edge list.
    pub fn degree(&self, from: NodePos) -> usize {
        match self.first_edge[from] {
            None => 0,
            Some(_) => 1 + self.extra_edges.get(&from).map_or(0, |e| e.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_edge_stays_inline() {
        let mut container = SparseEdgeContainer::new(4);
        let from = NodePos::new(0, true);
        let to = NodePos::new(1, false);
        container.add_edge(from, to);
        assert_eq!(container.edges(from), vec![to]);
        assert_eq!(container.degree(from), 1);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut container = SparseEdgeContainer::new(4);
        let from = NodePos::new(0, true);
        let to = NodePos::new(1, true);
        container.add_edge(from, to);
        container.add_edge(from, to);
        assert_eq!(container.edges(from).len(), 1);
        // duplicates of an overflowed edge are ignored too
        let second = NodePos::new(2, true);
        container.add_edge(from, second);
        container.add_edge(from, second);
        assert_eq!(container.edges(from), vec![to, second]);
        assert_eq!(container.degree(from), 2);
    }

    #[test]
    fn strands_are_independent() {
        let mut container = SparseEdgeContainer::new(2);
        container.add_edge(NodePos::new(0, true), NodePos::new(1, true));
        assert!(container.edges(NodePos::new(0, false)).is_empty());
        assert_eq!(container.degree(NodePos::new(0, false)), 0);
    }
}
