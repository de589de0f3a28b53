//! The minimizer k-mer index ("hash list").
//!
//! Every distinct minimizer k-mer becomes one node of an implicit bidirected
//! graph. Nodes are addressed by a 128-bit content hash over the RLE k-mer;
//! the forward and reverse-complement hashes map to the same node with
//! opposite orientations. Per node the index keeps observation coverage, the
//! rolling-hash state captured when the node was first seen (used to reseed
//! rescans), and the packed RLE sequence plus run lengths. Edges between
//! consecutive minimizers of a read carry a sequence overlap and a coverage
//! counter, stored once under their canonical form.
//!
//! Ingestion is multithreaded over reads: batches are encoded and scanned in
//! parallel, then applied to the index in input order, so the resulting
//! index does not depend on the thread count.

use std::hash::BuildHasher;
use std::path::PathBuf;

use ahash::{AHashMap, RandomState};
use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::info;

use crate::assembly::minimizer::scan_minimizers;
use crate::assembly::storage::{AdjacentLengthStore, AdjacentSequenceStore, StorageHandle};
use crate::core::bidirected::{canon, NodePos, StrandVec};
use crate::core::encoding::{encode_sequence, reverse_complement};
use crate::io::reads::{stream_read_batches, SequenceRead, READ_BATCH_SIZE};

const CONTENT_HASH_SEEDS: (u64, u64, u64, u64) = (
    0x243f6a8885a308d3,
    0x13198a2e03707344,
    0xa4093822299f31d0,
    0x082efa98ec4e6c89,
);

/// 128-bit content hash of an RLE k-mer view.
///
/// Two independently seeded 64-bit hashes over the two halves of the view;
/// 64 bits alone would make collisions plausible at genome scale, and the
/// consensus contract relies on distinct k-mers never sharing a hash.
pub fn content_hash(sequence: &[u8]) -> u128 {
    let state = RandomState::with_seeds(
        CONTENT_HASH_SEEDS.0,
        CONTENT_HASH_SEEDS.1,
        CONTENT_HASH_SEEDS.2,
        CONTENT_HASH_SEEDS.3,
    );
    let half = sequence.len() / 2;
    let low = state.hash_one(&sequence[..half]);
    let high = state.hash_one(&sequence[half..]);
    (low as u128) | ((high as u128) << 64)
}

#[derive(Debug)]
pub struct KmerIndex {
    k: usize,
    /// Times any orientation of the node was observed.
    pub coverage: Vec<usize>,
    fake_fw_hashes: Vec<u64>,
    fake_bw_hashes: Vec<u64>,
    /// Canonical `(from, to) -> RLE overlap` between adjacent k-mers.
    pub sequence_overlap: StrandVec<AHashMap<NodePos, usize>>,
    /// Canonical `(from, to) -> times the adjacency was observed`.
    pub edge_coverage: StrandVec<AHashMap<NodePos, usize>>,
    hash_to_node: AHashMap<u128, NodePos>,
    sequences: AdjacentSequenceStore,
    sequence_handles: Vec<StorageHandle>,
    rev_comp_sequences: AdjacentSequenceStore,
    lengths: AdjacentLengthStore,
    length_handles: Vec<StorageHandle>,
}

impl KmerIndex {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            coverage: Vec::new(),
            fake_fw_hashes: Vec::new(),
            fake_bw_hashes: Vec::new(),
            sequence_overlap: StrandVec::new(),
            edge_coverage: StrandVec::new(),
            hash_to_node: AHashMap::new(),
            sequences: AdjacentSequenceStore::new(),
            sequence_handles: Vec::new(),
            rev_comp_sequences: AdjacentSequenceStore::new(),
            lengths: AdjacentLengthStore::new(),
            length_handles: Vec::new(),
        }
    }

    pub fn kmer_size(&self) -> usize {
        self.k
    }

    /// Number of distinct k-mer nodes.
    pub fn len(&self) -> usize {
        self.sequence_handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_handles.is_empty()
    }

    /// Look up the node for a forward RLE k-mer view, if present.
    pub fn get_node(&self, sequence: &[u8]) -> Option<NodePos> {
        self.hash_to_node.get(&content_hash(sequence)).copied()
    }

    pub fn fake_fw_hash(&self, id: usize) -> u64 {
        self.fake_fw_hashes[id]
    }

    pub fn fake_bw_hash(&self, id: usize) -> u64 {
        self.fake_bw_hashes[id]
    }

    /// The stored RLE sequence of a node, forward orientation.
    pub fn rle_sequence(&self, id: usize) -> &[u8] {
        self.sequences.view(self.sequence_handles[id], self.k)
    }

    /// The reverse-complement view of a node. Valid after [`Self::finalize`].
    pub fn rev_comp_sequence(&self, id: usize) -> &[u8] {
        let handle = self
            .sequences
            .rev_comp_location(self.sequence_handles[id], self.k);
        self.rev_comp_sequences.view(handle, self.k)
    }

    /// Per-position run lengths of a node, forward orientation.
    pub fn run_lengths(&self, id: usize) -> &[u16] {
        self.lengths.get(self.length_handles[id], self.k)
    }

    /// Record an overlap for a canonical edge; an existing value wins.
    pub fn add_sequence_overlap(&mut self, from: NodePos, to: NodePos, overlap: usize) {
        let (from, to) = canon(from, to);
        self.sequence_overlap[from].entry(to).or_insert(overlap);
    }

    /// Overwrite the overlap of a canonical edge.
    pub fn set_sequence_overlap(&mut self, from: NodePos, to: NodePos, overlap: usize) {
        let (from, to) = canon(from, to);
        self.sequence_overlap[from].insert(to, overlap);
    }

    /// The recorded overlap of an edge. Panics if the edge is unknown.
    pub fn get_overlap(&self, from: NodePos, to: NodePos) -> usize {
        let (from, to) = canon(from, to);
        self.sequence_overlap[from][&to]
    }

    pub fn increment_edge_coverage(&mut self, from: NodePos, to: NodePos, amount: usize) {
        let (from, to) = canon(from, to);
        *self.edge_coverage[from].entry(to).or_insert(0) += amount;
    }

    pub fn decrement_edge_coverage(&mut self, from: NodePos, to: NodePos, amount: usize) {
        let (from, to) = canon(from, to);
        let coverage = self.edge_coverage[from]
            .get_mut(&to)
            .expect("decremented edge exists");
        debug_assert!(*coverage >= amount);
        *coverage -= amount;
    }

    /// Coverage of an edge. Panics if the edge is unknown.
    pub fn get_edge_coverage(&self, from: NodePos, to: NodePos) -> usize {
        let (from, to) = canon(from, to);
        self.edge_coverage[from][&to]
    }

    pub fn num_sequence_overlaps(&self) -> usize {
        (0..self.len())
            .map(|i| {
                self.sequence_overlap[NodePos::new(i, true)].len()
                    + self.sequence_overlap[NodePos::new(i, false)].len()
            })
            .sum()
    }

    /// Build the reverse-complement sequence store. Must run after the last
    /// read has been applied and before any reverse view is taken.
    pub fn finalize(&mut self) {
        self.rev_comp_sequences = self.sequences.reverse_complement_store();
    }

    /// Encode, scan and apply a single read. Returns the emission count.
    pub fn add_read(&mut self, raw: &[u8], w: usize, hpc: bool) -> Result<usize> {
        match prepare_read(raw, self.k, w, hpc)? {
            Some(prepared) => Ok(apply_read(self, &prepared)),
            None => Ok(0),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_or_get_node(
        &mut self,
        sequence: &[u8],
        rev_sequence: &[u8],
        lengths: &[u16],
        lengths_start: usize,
        lengths_end: usize,
        previous: u128,
        overlap: usize,
        fake_fw: u64,
        fake_bw: u64,
    ) -> (NodePos, u128) {
        let fw_hash = content_hash(sequence);
        if let Some(&node) = self.hash_to_node.get(&fw_hash) {
            return (node, fw_hash);
        }
        let bw_hash = content_hash(rev_sequence);
        debug_assert!(!self.hash_to_node.contains_key(&bw_hash));
        let id = self.sequence_handles.len();
        self.hash_to_node.insert(fw_hash, NodePos::new(id, true));
        self.hash_to_node.insert(bw_hash, NodePos::new(id, false));
        self.sequence_handles
            .push(self.sequences.add(sequence, fw_hash, previous, overlap));
        self.length_handles.push(self.lengths.add(
            lengths,
            lengths_start,
            lengths_end,
            fw_hash,
            previous,
            overlap,
        ));
        self.coverage.push(0);
        self.sequence_overlap.push(AHashMap::new());
        self.edge_coverage.push(AHashMap::new());
        self.fake_fw_hashes.push(fake_fw);
        self.fake_bw_hashes.push(fake_bw);
        (NodePos::new(id, true), fw_hash)
    }
}

/// A read after parallel preparation: encoded both ways, minimizers found.
struct PreparedRead {
    codes: Vec<u8>,
    rev_codes: Vec<u8>,
    lengths: Vec<u16>,
    emissions: Vec<(usize, u64, u64)>,
}

fn prepare_read(raw: &[u8], k: usize, w: usize, hpc: bool) -> Result<Option<PreparedRead>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let (codes, lengths) = encode_sequence(raw, hpc)?;
    if codes.len() <= k + w {
        return Ok(None);
    }
    let rev_codes = reverse_complement(&codes);
    let mut emissions = Vec::new();
    scan_minimizers(&codes, k, w, |pos, fw_hash, bw_hash| {
        emissions.push((pos, fw_hash, bw_hash));
    });
    Ok(Some(PreparedRead {
        codes,
        rev_codes,
        lengths,
        emissions,
    }))
}

fn apply_read(index: &mut KmerIndex, read: &PreparedRead) -> usize {
    let k = index.k;
    let mut last: Option<NodePos> = None;
    let mut last_pos = 0usize;
    let mut last_hash = 0u128;
    for &(pos, fake_fw, fake_bw) in &read.emissions {
        let fw_view = &read.codes[pos..pos + k];
        let rev_pos = read.codes.len() - (pos + k);
        let rev_view = &read.rev_codes[rev_pos..rev_pos + k];
        // adjacent emissions share storage and get an edge; a gap of k or
        // more opens a fresh buffer and records no edge
        let adjacent = last.is_some() && pos - last_pos < k;
        let overlap = if adjacent { last_pos + k - pos } else { 0 };
        let previous = if adjacent { last_hash } else { 0 };
        let (current, hash) = index.insert_or_get_node(
            fw_view,
            rev_view,
            &read.lengths,
            pos,
            pos + k,
            previous,
            overlap,
            fake_fw,
            fake_bw,
        );
        if let Some(previous_node) = last {
            if adjacent {
                index.add_sequence_overlap(previous_node, current, overlap);
                index.increment_edge_coverage(previous_node, current, 1);
            }
        }
        index.coverage[current.id] += 1;
        last = Some(current);
        last_pos = pos;
        last_hash = hash;
    }
    read.emissions.len()
}

/// Ingest every read of `files` into a fresh index.
pub fn index_reads(
    files: &[PathBuf],
    k: usize,
    w: usize,
    hpc: bool,
    pool: &rayon::ThreadPool,
) -> Result<KmerIndex> {
    let mut index = KmerIndex::new(k);
    let mut total_emissions = 0usize;
    for path in files {
        info!("reading sequences from {}", path.display());
        stream_read_batches(path, READ_BATCH_SIZE, |batch: Vec<SequenceRead>| {
            let prepared: Vec<Result<Option<PreparedRead>>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|read| prepare_read(&read.sequence, k, w, hpc))
                    .collect()
            });
            for (read, outcome) in batch.iter().zip(prepared) {
                let outcome =
                    outcome.with_context(|| format!("record '{}'", read.id))?;
                if let Some(prepared_read) = outcome {
                    total_emissions += apply_read(&mut index, &prepared_read);
                }
            }
            Ok(())
        })
        .with_context(|| format!("while reading file {}", path.display()))?;
    }
    index.finalize();
    info!("{} minimizer k-mer occurrences", total_emissions);
    info!("{} distinct k-mer nodes", index.len());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ: &[u8] = b"GCACGAAACTTGTTGGCCCAGTGTGAATCG";

    fn indexed(reads: &[&[u8]], k: usize, w: usize, hpc: bool) -> KmerIndex {
        let mut index = KmerIndex::new(k);
        for read in reads {
            index.add_read(read, w, hpc).unwrap();
        }
        index.finalize();
        index
    }

    #[test]
    fn short_reads_are_skipped() {
        let short: &[u8] = b"ACGTACGT";
        let index = indexed(&[short], 5, 3, false);
        assert!(index.is_empty());
    }

    #[test]
    fn window_of_one_indexes_every_kmer() {
        let index = indexed(&[READ], 5, 1, false);
        // all 26 k-mers of the read are distinct as canonical k-mers
        assert_eq!(index.len(), 26);
        assert!(index.coverage.iter().all(|&c| c == 1));
        // consecutive k-mers overlap by k-1
        let (codes, _) = encode_sequence(READ, false).unwrap();
        let a = index.get_node(&codes[0..5]).unwrap();
        let b = index.get_node(&codes[1..6]).unwrap();
        assert_eq!(index.get_overlap(a, b), 4);
        assert_eq!(index.get_edge_coverage(a, b), 1);
    }

    #[test]
    fn both_strands_resolve_to_one_node() {
        let index = indexed(&[READ], 5, 3, false);
        let (codes, _) = encode_sequence(READ, false).unwrap();
        let rev = reverse_complement(&codes);
        // any indexed k-mer must be findable through both strands
        let mut found = 0;
        for pos in 0..codes.len() - 5 + 1 {
            if let Some(node) = index.get_node(&codes[pos..pos + 5]) {
                let rev_pos = codes.len() - (pos + 5);
                let mirror = index.get_node(&rev[rev_pos..rev_pos + 5]).unwrap();
                assert_eq!(mirror.id, node.id);
                assert_eq!(mirror.forward, !node.forward);
                found += 1;
            }
        }
        assert!(found > 0);
    }

    #[test]
    fn indexing_is_strand_symmetric() {
        let forward = indexed(&[READ], 5, 3, false);
        let rc: Vec<u8> = READ
            .iter()
            .rev()
            .map(|&b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect();
        let backward = indexed(&[rc.as_slice()], 5, 3, false);
        assert_eq!(forward.len(), backward.len());
        let mut forward_coverage = forward.coverage.clone();
        let mut backward_coverage = backward.coverage.clone();
        forward_coverage.sort_unstable();
        backward_coverage.sort_unstable();
        assert_eq!(forward_coverage, backward_coverage);
        assert_eq!(
            forward.num_sequence_overlaps(),
            backward.num_sequence_overlaps()
        );
    }

    #[test]
    fn overlaps_are_canonical_and_bounded() {
        let index = indexed(&[READ], 5, 3, false);
        let k = index.kmer_size();
        for id in 0..index.len() {
            for from in [NodePos::new(id, true), NodePos::new(id, false)] {
                for (&to, &overlap) in &index.sequence_overlap[from] {
                    assert_eq!(canon(from, to), (from, to));
                    assert!(overlap < k);
                }
            }
        }
    }

    #[test]
    fn repeated_reads_accumulate_coverage() {
        let index = indexed(&[READ, READ, READ], 5, 3, false);
        assert!(index.coverage.iter().all(|&c| c == 3));
    }

    #[test]
    fn reverse_views_match_after_finalize() {
        let index = indexed(&[READ], 5, 3, false);
        for id in 0..index.len() {
            let forward = index.rle_sequence(id);
            let reverse = index.rev_comp_sequence(id);
            assert_eq!(reverse_complement(forward), reverse);
        }
    }
}
