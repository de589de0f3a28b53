//! Transitive edge cleaning.
//!
//! A minimizer sketch can record a "shortcut" edge `u -> v` even though an
//! intermediate minimizer k-mer lies inside the bridging sequence
//! `rle(u) . rle(v)[overlap..]`: the intermediate was simply emitted while
//! scanning a different read. The cleaner rescans every bridging sequence
//! with the rolling hasher reseeded from `u`'s captured state, looks up each
//! internal window whose rolling hash matches a known minimizer prefix, and
//! replaces the direct edge by the discovered path, moving edge coverage
//! onto the path and crediting the intermediates' node coverage.

use ahash::{AHashMap, AHashSet};
use tracing::info;

use crate::assembly::kmer_index::KmerIndex;
use crate::core::bidirected::{canon, NodePos, StrandVec};
use crate::core::rolling_hash::RollingHasher;

/// Concatenation of two overlapping RLE k-mers, materialized on demand.
struct BridgingSequence<'a> {
    first: &'a [u8],
    second: &'a [u8],
    overlap: usize,
    materialized: Vec<u8>,
}

impl<'a> BridgingSequence<'a> {
    fn new(first: &'a [u8], second: &'a [u8], overlap: usize) -> Self {
        debug_assert!(overlap < first.len() && overlap < second.len());
        Self {
            first,
            second,
            overlap,
            materialized: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.first.len() + self.second.len() - self.overlap
    }

    #[inline]
    fn at(&self, index: usize) -> u8 {
        if index < self.first.len() {
            self.first[index]
        } else {
            self.second[index - self.first.len() + self.overlap]
        }
    }

    /// A window of the concatenation; the backing buffer is built lazily so
    /// bridging sequences without any prefix-hash hit never allocate.
    fn window(&mut self, start: usize, size: usize) -> &[u8] {
        if self.materialized.is_empty() {
            let mut buffer = Vec::with_capacity(self.len());
            buffer.extend_from_slice(self.first);
            buffer.extend_from_slice(&self.second[self.overlap..]);
            self.materialized = buffer;
        }
        &self.materialized[start..start + size]
    }
}

/// Discovered intermediate chains, keyed by the directed edge they replace.
pub struct TransitiveCleaner {
    middles: StrandVec<AHashMap<NodePos, Vec<NodePos>>>,
    new_overlaps: Vec<(NodePos, NodePos, usize)>,
}

impl TransitiveCleaner {
    pub fn new(k: usize, index: &KmerIndex) -> Self {
        let mut cleaner = Self {
            middles: StrandVec::with_default(index.len()),
            new_overlaps: Vec::new(),
        };
        let prefixes = minimizer_prefixes(index);
        for id in 0..index.len() {
            for forward in [true, false] {
                let from = NodePos::new(id, forward);
                if index.sequence_overlap[from].is_empty() {
                    continue;
                }
                let first = if forward {
                    index.rle_sequence(id)
                } else {
                    index.rev_comp_sequence(id)
                };
                let mut targets: Vec<(NodePos, usize)> = index.sequence_overlap[from]
                    .iter()
                    .map(|(&to, &overlap)| (to, overlap))
                    .collect();
                targets.sort_unstable();
                for (to, overlap) in targets {
                    debug_assert!(to.id >= id);
                    let second = if to.forward {
                        index.rle_sequence(to.id)
                    } else {
                        index.rev_comp_sequence(to.id)
                    };
                    let mut bridge = BridgingSequence::new(first, second, overlap);
                    cleaner.add_middles(k, from, to, &mut bridge, index, &prefixes);
                }
            }
        }
        cleaner
    }

    /// Expand a walk by splicing discovered intermediates between every
    /// consecutive pair, repeatedly, until no pair has a recorded middle.
    pub fn insert_middles(&self, mut walk: Vec<NodePos>) -> Vec<NodePos> {
        let mut result = Vec::new();
        while walk.len() >= 2 {
            let from = walk[walk.len() - 2];
            let to = walk[walk.len() - 1];
            match self.middles[from].get(&to) {
                None => {
                    result.push(walk.pop().expect("walk has a tail"));
                }
                Some(middle) => {
                    debug_assert!(!middle.is_empty());
                    walk.pop();
                    walk.extend_from_slice(middle);
                    walk.push(to);
                }
            }
        }
        result.push(walk.pop().expect("walk has a head"));
        result.reverse();
        result
    }

    fn add_middles(
        &mut self,
        k: usize,
        start: NodePos,
        end: NodePos,
        bridge: &mut BridgingSequence<'_>,
        index: &KmerIndex,
        prefixes: &AHashSet<u64>,
    ) {
        let mut path = Vec::new();
        let mut previous = start;
        let mut previous_pos = 0usize;
        // the rolling state captured at node creation, swapped when the
        // bridging sequence enters through the reverse strand
        let (fw_seed, bw_seed) = if start.forward {
            (index.fake_fw_hash(start.id), index.fake_bw_hash(start.id))
        } else {
            (index.fake_bw_hash(start.id), index.fake_fw_hash(start.id))
        };
        let mut hasher = RollingHasher::seeded(k, fw_seed, bw_seed);
        debug_assert!(prefixes.contains(&hasher.hash()));
        for i in 1..bridge.len() - k {
            hasher.add(bridge.at(i + k - 1));
            hasher.remove(bridge.at(i - 1));
            if !prefixes.contains(&hasher.hash()) {
                continue;
            }
            let Some(here) = index.get_node(bridge.window(i, k)) else {
                continue;
            };
            path.push(here);
            let (canon_from, canon_to) = canon(previous, here);
            self.new_overlaps
                .push((canon_from, canon_to, k - (i - previous_pos)));
            previous = here;
            previous_pos = i;
        }
        if !path.is_empty() {
            debug_assert_ne!(previous, start);
            let (canon_from, canon_to) = canon(previous, end);
            self.new_overlaps.push((
                canon_from,
                canon_to,
                k - (bridge.len() - k - previous_pos),
            ));
            self.middles[start].insert(end, path);
        }
    }
}

fn minimizer_prefixes(index: &KmerIndex) -> AHashSet<u64> {
    let mut prefixes = AHashSet::with_capacity(index.len() * 2);
    for id in 0..index.len() {
        prefixes.insert(index.fake_fw_hash(id));
        prefixes.insert(index.fake_bw_hash(id));
    }
    prefixes
}

/// Replace every transitive edge of the index by its intermediate path.
pub fn clean_transitive_edges(index: &mut KmerIndex, k: usize) {
    let cleaner = TransitiveCleaner::new(k, index);
    let mut added_coverage: Vec<(NodePos, NodePos, usize)> = Vec::new();
    let mut removed_coverage: Vec<(NodePos, NodePos, usize)> = Vec::new();
    let mut node_credits: Vec<(usize, usize)> = Vec::new();
    let mut broken = 0usize;
    for id in 0..index.len() {
        for forward in [true, false] {
            let from = NodePos::new(id, forward);
            let mut targets: Vec<(NodePos, usize)> = index.edge_coverage[from]
                .iter()
                .map(|(&to, &coverage)| (to, coverage))
                .collect();
            targets.sort_unstable();
            for (to, coverage) in targets {
                let chain = cleaner.insert_middles(vec![from, to]);
                if chain.len() == 2 {
                    continue;
                }
                broken += 1;
                let (canon_from, canon_to) =
                    canon(chain[0], *chain.last().expect("chain is non-empty"));
                removed_coverage.push((canon_from, canon_to, coverage));
                for pair in chain.windows(2) {
                    let (canon_from, canon_to) = canon(pair[0], pair[1]);
                    added_coverage.push((canon_from, canon_to, coverage));
                }
                for middle in &chain[1..chain.len() - 1] {
                    node_credits.push((middle.id, coverage));
                }
            }
        }
    }
    for &(from, to, overlap) in &cleaner.new_overlaps {
        index.set_sequence_overlap(from, to, overlap);
    }
    for (from, to, coverage) in added_coverage {
        index.increment_edge_coverage(from, to, coverage);
    }
    for (from, to, coverage) in removed_coverage {
        index.decrement_edge_coverage(from, to, coverage);
    }
    for (id, coverage) in node_credits {
        index.coverage[id] += coverage;
    }
    info!("{} transitive edges cleaned", broken);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoding::encode_sequence;

    const READ: &[u8] = b"GCACGAAACTTGTTGGCCCAGTGTGAATCG";
    const K: usize = 5;

    fn chain_nodes(index: &KmerIndex, codes: &[u8], positions: &[usize]) -> Vec<NodePos> {
        positions
            .iter()
            .map(|&p| index.get_node(&codes[p..p + K]).unwrap())
            .collect()
    }

    #[test]
    fn direct_edge_is_replaced_by_the_intermediate_path() {
        // index with w=1 so every k-mer of the read is a node and all
        // consecutive pairs are edges of overlap k-1
        let mut index = KmerIndex::new(K);
        index.add_read(READ, 1, false).unwrap();
        index.finalize();
        let (codes, _) = encode_sequence(READ, false).unwrap();
        let nodes = chain_nodes(&index, &codes, &[0, 1, 2]);
        let (u, w, v) = (nodes[0], nodes[1], nodes[2]);

        // forge the shortcut a second read would have recorded: u -> v
        // skipping w, with the composed overlap k-2 and coverage 3
        index.add_sequence_overlap(u, v, K - 2);
        index.increment_edge_coverage(u, v, 3);
        let w_coverage_before = index.coverage[w.id];

        clean_transitive_edges(&mut index, K);

        // the shortcut lost its coverage, the path gained it
        assert_eq!(index.get_edge_coverage(u, v), 0);
        assert_eq!(index.get_edge_coverage(u, w), 1 + 3);
        assert_eq!(index.get_edge_coverage(w, v), 1 + 3);
        assert_eq!(index.coverage[w.id], w_coverage_before + 3);
        // path overlaps are intact
        assert_eq!(index.get_overlap(u, w), K - 1);
        assert_eq!(index.get_overlap(w, v), K - 1);
    }

    #[test]
    fn genuine_direct_edges_are_kept() {
        let mut index = KmerIndex::new(K);
        index.add_read(READ, 1, false).unwrap();
        index.finalize();
        let (codes, _) = encode_sequence(READ, false).unwrap();
        let nodes = chain_nodes(&index, &codes, &[0, 1]);
        let coverage_before = index.get_edge_coverage(nodes[0], nodes[1]);

        clean_transitive_edges(&mut index, K);

        assert_eq!(
            index.get_edge_coverage(nodes[0], nodes[1]),
            coverage_before
        );
    }

    #[test]
    fn total_edge_coverage_is_invariant() {
        let mut index = KmerIndex::new(K);
        index.add_read(READ, 1, false).unwrap();
        index.finalize();
        let (codes, _) = encode_sequence(READ, false).unwrap();
        let nodes = chain_nodes(&index, &codes, &[3, 4, 5, 6]);
        // shortcut jumping two intermediates
        index.add_sequence_overlap(nodes[0], nodes[3], K - 3);
        index.increment_edge_coverage(nodes[0], nodes[3], 2);

        let total_before: usize = (0..index.len())
            .flat_map(|i| {
                [NodePos::new(i, true), NodePos::new(i, false)]
                    .map(|d| index.edge_coverage[d].values().sum::<usize>())
            })
            .sum();
        clean_transitive_edges(&mut index, K);
        let total_after: usize = (0..index.len())
            .flat_map(|i| {
                [NodePos::new(i, true), NodePos::new(i, false)]
                    .map(|d| index.edge_coverage[d].values().sum::<usize>())
            })
            .sum();
        // the shortcut's 2 units moved onto a 3-edge path: net +2*3 -2
        assert_eq!(total_after, total_before + 2 * 3 - 2);
    }
}
