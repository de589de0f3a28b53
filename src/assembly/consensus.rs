//! Per-position consensus over unitig sequences, built concurrently.
//!
//! After unitig contraction every k-mer node owns a fixed position range
//! inside exactly one unitig. A second pass over the reads re-scans their
//! minimizers, groups consecutive hits on the same unitig diagonal into
//! match blocks, and folds every block's observed bases and run-length
//! expansions into per-position counters.
//!
//! Many threads may update one unitig at once: its counters are split into
//! chunks of `MUTEX_SPAN` positions, each owned by one mutex, and a writer
//! locks the ascending run of chunks covering its block (with 64 positions
//! of slack on both sides) before touching anything. Ascending acquisition
//! order makes neighboring writers deadlock-free.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashMap;
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use tracing::info;

use crate::assembly::kmer_index::KmerIndex;
use crate::assembly::minimizer::scan_minimizers;
use crate::assembly::unitig::UnitigGraph;
use crate::core::encoding::{complement, decode_base, encode_sequence, CODE_RANGE};
use crate::io::reads::{stream_read_batches, READ_BATCH_SIZE};

/// Positions covered by one consensus mutex (1 Mi positions). One mutex per
/// unitig would serialize whole chromosomes; one per position would drown in
/// allocations.
pub const MUTEX_SPAN: usize = 1 << 20;

/// Interner from run-length-expanded strings to dense ids, one namespace
/// per base code.
pub struct StringIndex {
    maps: Vec<DashMap<String, u32, ahash::RandomState>>,
    next_id: Vec<AtomicU32>,
    reverse: Vec<Vec<String>>,
}

impl StringIndex {
    fn new() -> Self {
        Self {
            maps: (0..CODE_RANGE)
                .map(|_| DashMap::with_hasher(ahash::RandomState::new()))
                .collect(),
            next_id: (0..CODE_RANGE).map(|_| AtomicU32::new(0)).collect(),
            reverse: Vec::new(),
        }
    }

    /// Intern `expanded` under base code `code`; stable for the lifetime of
    /// the index.
    pub fn get_or_insert(&self, code: u8, expanded: &str) -> u32 {
        let map = &self.maps[code as usize];
        if let Some(existing) = map.get(expanded) {
            return *existing;
        }
        *map.entry(expanded.to_string())
            .or_insert_with(|| self.next_id[code as usize].fetch_add(1, Ordering::Relaxed))
    }

    /// Build the id-to-string lookup; call once after the last insertion.
    fn build_reverse_index(&mut self) {
        self.reverse = self
            .maps
            .iter()
            .enumerate()
            .map(|(code, map)| {
                let count = self.next_id[code].load(Ordering::Relaxed) as usize;
                let mut strings = vec![String::new(); count];
                for entry in map.iter() {
                    strings[*entry.value() as usize] = entry.key().clone();
                }
                strings
            })
            .collect();
    }

    /// The expanded string behind an interned id. Valid after finalization.
    pub fn get(&self, code: u8, id: u32) -> &str {
        &self.reverse[code as usize][id as usize]
    }
}

/// Packed 2-bit consensus codes plus a presence bit per position.
struct PackedBases {
    payload: Vec<u64>,
    occupied: Vec<u64>,
}

impl PackedBases {
    fn new(len: usize) -> Self {
        Self {
            payload: vec![0; len.div_ceil(32)],
            occupied: vec![0; len.div_ceil(64)],
        }
    }

    #[inline]
    fn get(&self, index: usize) -> u8 {
        if self.occupied[index / 64] & (1 << (index % 64)) == 0 {
            return 0;
        }
        ((self.payload[index / 32] >> (2 * (index % 32))) & 0b11) as u8 + 1
    }

    #[inline]
    fn set(&mut self, index: usize, code: u8) {
        debug_assert!((1..=4).contains(&code));
        self.payload[index / 32] |= ((code - 1) as u64) << (2 * (index % 32));
        self.occupied[index / 64] |= 1 << (index % 64);
    }
}

/// Counter state for one `MUTEX_SPAN`-sized slice of a unitig.
struct ConsensusChunk {
    start: usize,
    codes: PackedBases,
    /// `(string id, count)` for the dominant early observation; promoted to
    /// `complex` when the id does not fit or the cell saturates.
    simple: Vec<(u8, u8)>,
    /// `(unitig position, string id) -> count` overflow.
    complex: AHashMap<(u32, u32), u32>,
}

/// Consensus output for one unitig: RLE codes plus the winning expanded
/// string id per position.
pub struct ConsensusSequence {
    pub codes: Vec<u8>,
    pub expanded_ids: Vec<u32>,
}

pub struct ConsensusMaker {
    chunks: Vec<Vec<Mutex<ConsensusChunk>>>,
    lengths: Vec<usize>,
    string_index: StringIndex,
}

impl ConsensusMaker {
    pub fn new(unitig_lengths: &[usize]) -> Self {
        let chunks = unitig_lengths
            .iter()
            .map(|&length| {
                debug_assert!(length >= 1);
                (0..length.div_ceil(MUTEX_SPAN))
                    .map(|chunk| {
                        let start = chunk * MUTEX_SPAN;
                        let chunk_len = MUTEX_SPAN.min(length - start);
                        Mutex::new(ConsensusChunk {
                            start,
                            codes: PackedBases::new(chunk_len),
                            simple: vec![(0, 0); chunk_len],
                            complex: AHashMap::new(),
                        })
                    })
                    .collect()
            })
            .collect();
        Self {
            chunks,
            lengths: unitig_lengths.to_vec(),
            string_index: StringIndex::new(),
        }
    }

    /// Fold one match block into the counters of `unitig`.
    ///
    /// The block observed `codes[seq_start..seq_end]` against unitig
    /// positions `[unitig_start, unitig_end)`, forward or reverse. A stored
    /// base disagreeing with an observation is an upstream matching bug and
    /// aborts.
    #[allow(clippy::too_many_arguments)]
    pub fn add_counts(
        &self,
        unitig: usize,
        unitig_start: usize,
        unitig_end: usize,
        forward: bool,
        codes: &[u8],
        lengths: &[u16],
        seq_start: usize,
        seq_end: usize,
    ) {
        debug_assert!(unitig_end > unitig_start);
        debug_assert_eq!(unitig_end - unitig_start, seq_end - seq_start);
        debug_assert!(unitig_end <= self.lengths[unitig]);
        let chunks = &self.chunks[unitig];
        let low = unitig_start.saturating_sub(64) / MUTEX_SPAN;
        let high = (unitig_end + 64).div_ceil(MUTEX_SPAN).min(chunks.len());
        let mut guards: Vec<MutexGuard<'_, ConsensusChunk>> =
            (low..high).map(|i| chunks[i].lock()).collect();
        for i in 0..seq_end - seq_start {
            let offset = if forward {
                unitig_start + i
            } else {
                unitig_end - 1 - i
            };
            let observed = codes[seq_start + i];
            let stored = if forward { observed } else { complement(observed) };
            let chunk = &mut *guards[offset / MUTEX_SPAN - low];
            let local = offset - chunk.start;
            let existing = chunk.codes.get(local);
            if existing == 0 {
                chunk.codes.set(local, stored);
            } else {
                assert_eq!(
                    existing, stored,
                    "read disagrees with unitig {unitig} at position {offset}: \
                     minimizer matching is broken upstream"
                );
            }
            // for a homopolymer run the reverse complement is the
            // complement base repeated the same number of times
            let run = lengths[seq_start + i] as usize;
            let expanded: String = std::iter::repeat(decode_base(stored)).take(run).collect();
            let id = self.string_index.get_or_insert(stored, &expanded);
            let cell = &mut chunk.simple[local];
            if cell.1 == 0 && id <= u8::MAX as u32 {
                *cell = (id as u8, 1);
            } else if cell.1 > 0 && cell.1 < u8::MAX && u32::from(cell.0) == id {
                cell.1 += 1;
            } else {
                *chunk.complex.entry((offset as u32, id)).or_insert(0) += 1;
            }
        }
    }

    /// Resolve every position to its majority expanded string.
    ///
    /// The simple cell's mass is merged into a matching complex entry, and
    /// on equal counts the simple cell wins; complex entries are visited in
    /// (position, id) order so the tie-break is reproducible.
    pub fn into_sequences(mut self) -> (Vec<ConsensusSequence>, StringIndex) {
        self.string_index.build_reverse_index();
        let mut result = Vec::with_capacity(self.chunks.len());
        for (unitig, unitig_chunks) in self.chunks.into_iter().enumerate() {
            let length = self.lengths[unitig];
            let mut codes = Vec::with_capacity(length);
            let mut expanded_ids = Vec::with_capacity(length);
            let mut complex: Vec<(u32, u32, u32)> = Vec::new();
            let unitig_chunks: Vec<ConsensusChunk> = unitig_chunks
                .into_iter()
                .map(|m| m.into_inner())
                .collect();
            for chunk in &unitig_chunks {
                complex.extend(chunk.complex.iter().map(|(&(pos, id), &count)| (pos, id, count)));
            }
            complex.sort_unstable();
            let mut cursor = 0usize;
            for position in 0..length {
                let chunk = &unitig_chunks[position / MUTEX_SPAN];
                let local = position - chunk.start;
                let (simple_id, simple_count) = chunk.simple[local];
                let mut best_count = u32::from(simple_count);
                let mut best_id = u32::from(simple_id);
                while cursor < complex.len() && complex[cursor].0 == position as u32 {
                    let (_, id, mut count) = complex[cursor];
                    cursor += 1;
                    if simple_count > 0 && id == u32::from(simple_id) {
                        count += u32::from(simple_count);
                    }
                    if count > best_count {
                        best_count = count;
                        best_id = id;
                    }
                }
                assert!(
                    best_count > 0,
                    "unitig {unitig} position {position} received no observations"
                );
                codes.push(chunk.codes.get(local));
                expanded_ids.push(best_id);
            }
            result.push(ConsensusSequence {
                codes,
                expanded_ids,
            });
        }
        (result, self.string_index)
    }
}

/// Where a k-mer node sits: `(unitig, offset, orientation)`.
type KmerPlacement = Option<(usize, usize, bool)>;

fn kmer_placements(index: &KmerIndex, unitigs: &UnitigGraph) -> (Vec<KmerPlacement>, Vec<usize>) {
    let k = index.kmer_size();
    let mut placements: Vec<KmerPlacement> = vec![None; index.len()];
    let mut lengths = Vec::with_capacity(unitigs.unitigs.len());
    for (i, unitig) in unitigs.unitigs.iter().enumerate() {
        let mut offset = 0usize;
        for (j, node) in unitig.iter().enumerate() {
            if j > 0 {
                let overlap = index.get_overlap(unitig[j - 1], *node);
                debug_assert!(overlap < k);
                offset += k - overlap;
            }
            debug_assert!(placements[node.id].is_none());
            placements[node.id] = Some((i, offset, node.forward));
        }
        lengths.push(offset + k);
    }
    (placements, lengths)
}

struct MatchBlock {
    seq_start: usize,
    seq_end: usize,
    unitig: usize,
    unitig_start: usize,
    unitig_end: usize,
    diagonal: isize,
    forward: bool,
}

fn add_read_observations(
    raw: &[u8],
    k: usize,
    w: usize,
    hpc: bool,
    index: &KmerIndex,
    placements: &[KmerPlacement],
    maker: &ConsensusMaker,
) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let (codes, lengths) = encode_sequence(raw, hpc)?;
    if codes.len() <= k + w {
        return Ok(());
    }
    let mut positions = Vec::new();
    scan_minimizers(&codes, k, w, |pos, _, _| positions.push(pos));

    let flush = |block: &MatchBlock| {
        maker.add_counts(
            block.unitig,
            block.unitig_start,
            block.unitig_end,
            block.forward,
            &codes,
            &lengths,
            block.seq_start,
            block.seq_end,
        );
    };
    let mut current: Option<MatchBlock> = None;
    for pos in positions {
        let placement = index
            .get_node(&codes[pos..pos + k])
            .and_then(|node| {
                placements[node.id].map(|(unitig, offset, unitig_forward)| {
                    let forward = if node.forward {
                        unitig_forward
                    } else {
                        !unitig_forward
                    };
                    (unitig, offset, forward)
                })
            });
        let Some((unitig, offset, forward)) = placement else {
            // unknown or filtered-out k-mer: the block ends here
            if let Some(block) = current.take() {
                flush(&block);
            }
            continue;
        };
        let diagonal = if forward {
            pos as isize - offset as isize
        } else {
            (pos + offset) as isize
        };
        match current.as_mut() {
            Some(block)
                if block.unitig == unitig
                    && block.forward == forward
                    && block.diagonal == diagonal
                    && pos <= block.seq_end =>
            {
                debug_assert!(pos + k > block.seq_end);
                block.seq_end = pos + k;
                if forward {
                    debug_assert!(offset + k > block.unitig_end);
                    block.unitig_end = offset + k;
                } else {
                    debug_assert!(offset < block.unitig_start);
                    block.unitig_start = offset;
                }
            }
            _ => {
                if let Some(block) = current.take() {
                    flush(&block);
                }
                current = Some(MatchBlock {
                    seq_start: pos,
                    seq_end: pos + k,
                    unitig,
                    unitig_start: offset,
                    unitig_end: offset + k,
                    diagonal,
                    forward,
                });
            }
        }
    }
    if let Some(block) = current.take() {
        flush(&block);
    }
    Ok(())
}

/// Second pass over all reads: reconstruct the expanded consensus of every
/// unitig position.
pub fn build_consensus(
    files: &[PathBuf],
    index: &KmerIndex,
    unitigs: &UnitigGraph,
    w: usize,
    hpc: bool,
    pool: &rayon::ThreadPool,
) -> Result<(Vec<ConsensusSequence>, StringIndex)> {
    let k = index.kmer_size();
    let (placements, lengths) = kmer_placements(index, unitigs);
    let total_rle: usize = lengths.iter().sum();
    info!(
        "building consensus over {} unitigs, {} rle positions",
        unitigs.num_nodes(),
        total_rle
    );
    let maker = ConsensusMaker::new(&lengths);
    for path in files {
        stream_read_batches(path, READ_BATCH_SIZE, |batch| {
            pool.install(|| {
                batch.par_iter().try_for_each(|read| {
                    add_read_observations(
                        &read.sequence,
                        k,
                        w,
                        hpc,
                        index,
                        &placements,
                        &maker,
                    )
                    .with_context(|| format!("record '{}'", read.id))
                })
            })
        })
        .with_context(|| format!("while rescanning file {}", path.display()))?;
    }
    Ok(maker.into_sequences())
}
