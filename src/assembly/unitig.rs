//! Unitig contraction over the bidirected k-mer graph.
//!
//! A unitig is a maximal walk in which every internal node has exactly one
//! incoming and one outgoing covered edge. The first build contracts k-mer
//! nodes straight out of the index; the same contraction can then be applied
//! one level up after filtering (unitigs of unitigs). Every original node
//! lands in exactly one unitig, in exactly one orientation; hairpins fold
//! into a self-loop edge on the containing unitig.

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::assembly::kmer_index::KmerIndex;
use crate::assembly::sparse_edges::SparseEdgeContainer;
use crate::core::bidirected::{canon, NodePos, StrandVec};

#[derive(Debug, Default)]
pub struct UnitigGraph {
    /// Ordered directed k-mer nodes of every unitig.
    pub unitigs: Vec<Vec<NodePos>>,
    /// Per-node coverage, parallel to `unitigs`.
    pub unitig_coverage: Vec<Vec<usize>>,
    /// Bidirected adjacency between unitig ends.
    pub edges: StrandVec<AHashSet<NodePos>>,
    /// Canonical edge coverage.
    pub edge_cov: StrandVec<AHashMap<NodePos, usize>>,
}

impl UnitigGraph {
    pub fn num_nodes(&self) -> usize {
        self.unitigs.len()
    }

    /// Count each bidirected edge once, under its canonical form.
    pub fn num_edges(&self) -> usize {
        let mut total = 0;
        for id in 0..self.unitigs.len() {
            for forward in [true, false] {
                let from = NodePos::new(id, forward);
                for &to in &self.edges[from] {
                    if canon(from, to) == (from, to) {
                        total += 1;
                    }
                }
            }
        }
        total
    }

    pub fn average_coverage(&self, unitig: usize) -> f64 {
        let coverage = &self.unitig_coverage[unitig];
        debug_assert!(!coverage.is_empty());
        coverage.iter().sum::<usize>() as f64 / coverage.len() as f64
    }

    pub fn edge_coverage(&self, from: NodePos, to: NodePos) -> usize {
        let (from, to) = canon(from, to);
        self.edge_cov[from][&to]
    }

    pub fn set_edge_coverage(&mut self, from: NodePos, to: NodePos, coverage: usize) {
        let (from, to) = canon(from, to);
        self.edge_cov[from].insert(to, coverage);
    }

    fn push_empty(&mut self) -> usize {
        self.unitigs.push(Vec::new());
        self.unitig_coverage.push(Vec::new());
        self.edges.push(AHashSet::new());
        self.edge_cov.push(AHashMap::new());
        self.unitigs.len() - 1
    }

    /// Contract the covered k-mer graph of `index` into unitigs.
    ///
    /// Only nodes with `coverage >= min_coverage` and edges with
    /// `edge_coverage >= min_coverage` participate.
    pub fn from_kmer_index(index: &KmerIndex, min_coverage: usize) -> Self {
        let mut result = UnitigGraph::default();
        let node_count = index.len();
        let mut belongs = vec![false; node_count];
        let mut unitig_tips: AHashMap<NodePos, NodePos> = AHashMap::new();
        let edges = covered_edges(index, min_coverage);

        let record_tips = |result: &UnitigGraph, tips: &mut AHashMap<NodePos, NodePos>| {
            let unitig = result.unitigs.len() - 1;
            let nodes = &result.unitigs[unitig];
            tips.insert(*nodes.last().expect("unitig is non-empty"), NodePos::new(unitig, true));
            tips.insert(nodes[0].reverse(), NodePos::new(unitig, false));
        };

        // anchor a unitig at every branching or dead-end structure
        for id in 0..node_count {
            if index.coverage[id] < min_coverage {
                continue;
            }
            let forward = NodePos::new(id, true);
            let backward = NodePos::new(id, false);
            let forward_edges = edges.edges(forward);
            let backward_edges = edges.edges(backward);
            if backward_edges.len() != 1 {
                if !belongs[id] {
                    walk_unitig(&mut result, forward, &edges, &mut belongs, index);
                    record_tips(&result, &mut unitig_tips);
                }
                for &edge in &backward_edges {
                    if belongs[edge.id] {
                        continue;
                    }
                    debug_assert!(index.coverage[edge.id] >= min_coverage);
                    walk_unitig(&mut result, edge, &edges, &mut belongs, index);
                    record_tips(&result, &mut unitig_tips);
                }
            }
            if forward_edges.len() != 1 {
                if !belongs[id] {
                    walk_unitig(&mut result, backward, &edges, &mut belongs, index);
                    record_tips(&result, &mut unitig_tips);
                }
                for &edge in &forward_edges {
                    if belongs[edge.id] {
                        continue;
                    }
                    debug_assert!(index.coverage[edge.id] >= min_coverage);
                    walk_unitig(&mut result, edge, &edges, &mut belongs, index);
                    record_tips(&result, &mut unitig_tips);
                }
            }
        }
        // whatever remains lies on simple cycles
        for id in 0..node_count {
            if belongs[id] || index.coverage[id] < min_coverage {
                continue;
            }
            let forward = NodePos::new(id, true);
            debug_assert_eq!(edges.degree(forward), 1);
            debug_assert_eq!(edges.degree(forward.reverse()), 1);
            walk_unitig(&mut result, forward, &edges, &mut belongs, index);
            record_tips(&result, &mut unitig_tips);
        }
        for id in 0..node_count {
            debug_assert!(belongs[id] || index.coverage[id] < min_coverage);
        }

        // wire unitig tips together through the surviving k-mer edges
        let mut tips: Vec<(NodePos, NodePos)> = unitig_tips
            .iter()
            .map(|(&node, &unitig)| (node, unitig))
            .collect();
        tips.sort_unstable();
        for (from_node, from_unitig) in tips {
            for to_node in edges.edges(from_node) {
                let to_unitig = unitig_tips
                    .get(&to_node.reverse())
                    .expect("edge target is a unitig tip")
                    .reverse();
                result.edges[from_unitig].insert(to_unitig);
                result.edges[to_unitig.reverse()].insert(from_unitig.reverse());
                result.set_edge_coverage(
                    from_unitig,
                    to_unitig,
                    index.get_edge_coverage(from_node, to_node),
                );
            }
        }
        debug!(
            "contracted {} covered k-mers into {} unitigs",
            belongs.iter().filter(|&&b| b).count(),
            result.num_nodes()
        );
        result
    }

    /// Drop unitigs whose average coverage is below `threshold`, keeping
    /// edges between survivors.
    pub fn filter_by_coverage(&self, threshold: f64) -> Self {
        let kept: Vec<bool> = (0..self.unitigs.len())
            .map(|i| self.average_coverage(i) >= threshold)
            .collect();
        self.filter_nodes(&kept)
    }

    pub fn filter_nodes(&self, kept: &[bool]) -> Self {
        debug_assert_eq!(kept.len(), self.unitigs.len());
        let mut new_index = vec![usize::MAX; self.unitigs.len()];
        let mut next = 0usize;
        for (i, &keep) in kept.iter().enumerate() {
            if keep {
                new_index[i] = next;
                next += 1;
            }
        }
        let mut result = UnitigGraph::default();
        for _ in 0..next {
            result.push_empty();
        }
        for i in 0..self.unitigs.len() {
            if new_index[i] == usize::MAX {
                continue;
            }
            result.unitigs[new_index[i]] = self.unitigs[i].clone();
            result.unitig_coverage[new_index[i]] = self.unitig_coverage[i].clone();
            for forward in [true, false] {
                let old_pos = NodePos::new(i, forward);
                let new_pos = NodePos::new(new_index[i], forward);
                for &to in &self.edges[old_pos] {
                    if new_index[to.id] == usize::MAX {
                        continue;
                    }
                    result.edges[new_pos].insert(NodePos::new(new_index[to.id], to.forward));
                }
                for (&to, &coverage) in &self.edge_cov[old_pos] {
                    if new_index[to.id] == usize::MAX {
                        continue;
                    }
                    result.edge_cov[new_pos]
                        .insert(NodePos::new(new_index[to.id], to.forward), coverage);
                }
            }
        }
        result
    }

    /// Contract maximal non-branching chains of unitigs one level up.
    pub fn merge_linear_paths(&self) -> Self {
        let node_count = self.unitigs.len();
        let mut edges: StrandVec<AHashSet<NodePos>> = StrandVec::with_default(node_count);
        for id in 0..node_count {
            for forward in [true, false] {
                let from = NodePos::new(id, forward);
                for &to in &self.edges[from] {
                    edges[from].insert(to);
                    edges[to.reverse()].insert(from.reverse());
                }
            }
        }
        let mut result = UnitigGraph::default();
        let mut belongs: Vec<Option<NodePos>> = vec![None; node_count];
        for id in 0..node_count {
            let forward = NodePos::new(id, true);
            let backward = NodePos::new(id, false);
            if edges[forward].len() != 1 {
                for start in sorted(&edges[forward]) {
                    if belongs[start.id].is_some() {
                        continue;
                    }
                    self.merge_walk(&mut result, start, &edges, &mut belongs);
                }
                if belongs[id].is_none() {
                    self.merge_walk(&mut result, backward, &edges, &mut belongs);
                }
            }
            if edges[backward].len() != 1 {
                for start in sorted(&edges[backward]) {
                    if belongs[start.id].is_some() {
                        continue;
                    }
                    self.merge_walk(&mut result, start, &edges, &mut belongs);
                }
                if belongs[id].is_none() {
                    self.merge_walk(&mut result, forward, &edges, &mut belongs);
                }
            }
        }
        for id in 0..node_count {
            if belongs[id].is_none() {
                self.merge_walk(&mut result, NodePos::new(id, true), &edges, &mut belongs);
            }
        }
        // re-canonicalize surviving edges onto the merged unitigs
        for id in 0..node_count {
            for forward in [true, false] {
                let old_from = NodePos::new(id, forward);
                for &old_to in &self.edges[old_from] {
                    let mut from = belongs[old_from.id].expect("every unitig was merged");
                    let mut to = belongs[old_to.id].expect("every unitig was merged");
                    if from.id == to.id {
                        continue;
                    }
                    from.forward = !(from.forward ^ old_from.forward);
                    to.forward = !(to.forward ^ old_to.forward);
                    result.edges[from].insert(to);
                    result.set_edge_coverage(from, to, self.edge_coverage(old_from, old_to));
                }
            }
        }
        result
    }

    /// One greedy non-branching walk over whole unitigs, appending their
    /// nodes into a fresh merged unitig.
    fn merge_walk(
        &self,
        result: &mut UnitigGraph,
        start: NodePos,
        edges: &StrandVec<AHashSet<NodePos>>,
        belongs: &mut [Option<NodePos>],
    ) {
        let current = result.push_empty();
        let mut pos = start;
        debug_assert!(belongs[pos.id].is_none());
        belongs[pos.id] = Some(NodePos::new(current, pos.forward));
        self.append_oriented(result, current, pos);
        loop {
            if edges[pos].len() != 1 {
                break;
            }
            let next = *edges[pos].iter().next().expect("degree checked above");
            if edges[next.reverse()].len() != 1 {
                break;
            }
            if next == start {
                // closed a cycle: self-loop on the merged unitig
                let loop_pos = NodePos::new(current, true);
                result.edges[loop_pos].insert(loop_pos);
                result.set_edge_coverage(loop_pos, loop_pos, self.edge_coverage(pos, next));
                break;
            }
            if belongs[next.id].is_some() {
                // hairpin: ran into the opposite strand of this same walk
                debug_assert_eq!(next.id, pos.id);
                debug_assert_ne!(next.forward, pos.forward);
                let side = belongs[pos.id].expect("walk already placed pos").forward;
                let from = NodePos::new(current, side);
                result.edges[from].insert(from.reverse());
                result.set_edge_coverage(from, from.reverse(), self.edge_coverage(pos, next));
                break;
            }
            pos = next;
            debug_assert!(belongs[pos.id].is_none());
            belongs[pos.id] = Some(NodePos::new(current, pos.forward));
            self.append_oriented(result, current, pos);
        }
    }

    fn append_oriented(&self, result: &mut UnitigGraph, current: usize, pos: NodePos) {
        if pos.forward {
            result.unitigs[current].extend_from_slice(&self.unitigs[pos.id]);
            result.unitig_coverage[current].extend_from_slice(&self.unitig_coverage[pos.id]);
        } else {
            for (node, &coverage) in self.unitigs[pos.id]
                .iter()
                .rev()
                .zip(self.unitig_coverage[pos.id].iter().rev())
            {
                result.unitigs[current].push(node.reverse());
                result.unitig_coverage[current].push(coverage);
            }
        }
    }
}

fn sorted(set: &AHashSet<NodePos>) -> Vec<NodePos> {
    let mut nodes: Vec<NodePos> = set.iter().copied().collect();
    nodes.sort_unstable();
    nodes
}

/// The sparse bidirected adjacency of all edges at or above `min_coverage`.
pub fn covered_edges(index: &KmerIndex, min_coverage: usize) -> SparseEdgeContainer {
    let mut result = SparseEdgeContainer::new(index.len());
    for id in 0..index.len() {
        for forward in [true, false] {
            let from = NodePos::new(id, forward);
            let mut targets: Vec<NodePos> = index.edge_coverage[from]
                .iter()
                .filter(|&(_, &coverage)| coverage >= min_coverage)
                .map(|(&to, _)| to)
                .collect();
            targets.sort_unstable();
            for to in targets {
                result.add_edge(from, to);
                result.add_edge(to.reverse(), from.reverse());
            }
        }
    }
    result
}

/// One greedy non-branching walk over covered k-mer edges.
fn walk_unitig(
    result: &mut UnitigGraph,
    start: NodePos,
    edges: &SparseEdgeContainer,
    belongs: &mut [bool],
    index: &KmerIndex,
) {
    let current = result.push_empty();
    let mut pos = start;
    debug_assert!(!belongs[pos.id]);
    belongs[pos.id] = true;
    result.unitigs[current].push(pos);
    result.unitig_coverage[current].push(index.coverage[pos.id]);
    loop {
        let out = edges.edges(pos);
        if out.len() != 1 {
            break;
        }
        let next = out[0];
        if edges.degree(next.reverse()) != 1 {
            break;
        }
        if next == start {
            break;
        }
        if belongs[next.id] {
            // palindromic hairpin folds back onto this walk
            debug_assert_eq!(next.id, pos.id);
            debug_assert_ne!(next.forward, pos.forward);
            break;
        }
        pos = next;
        debug_assert!(!belongs[pos.id]);
        belongs[pos.id] = true;
        result.unitigs[current].push(pos);
        result.unitig_coverage[current].push(index.coverage[pos.id]);
    }
}
