//! Graph sink: GFA-style S/L text output.
//!
//! One `S` line per unitig carrying the expanded consensus sequence, the
//! unweighted mean node coverage (`ll:f`) and the coverage-length product
//! (`FC:f`); one `L` line per directed unitig adjacency with the expanded
//! (non-RLE) overlap and the edge coverage (`ec:i`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::assembly::consensus::{ConsensusSequence, StringIndex};
use crate::assembly::kmer_index::KmerIndex;
use crate::assembly::unitig::UnitigGraph;
use crate::core::bidirected::NodePos;

/// The expanded overlap of an edge: the sum of the first `overlap` run
/// lengths of the incoming k-mer, read in its written orientation.
fn expanded_overlap(index: &KmerIndex, from: NodePos, to: NodePos) -> usize {
    let overlap = index.get_overlap(from, to);
    let lengths = index.run_lengths(to.id);
    debug_assert!(lengths.len() > overlap);
    (0..overlap)
        .map(|offset| {
            let i = if to.forward {
                offset
            } else {
                lengths.len() - offset - 1
            };
            lengths[i] as usize
        })
        .sum()
}

fn orientation(forward: bool) -> char {
    if forward {
        '+'
    } else {
        '-'
    }
}

/// Write the unitig graph; returns the expanded length of every unitig.
pub fn write_graph(
    path: &Path,
    unitigs: &UnitigGraph,
    index: &KmerIndex,
    sequences: &[ConsensusSequence],
    strings: &StringIndex,
) -> Result<Vec<usize>> {
    debug_assert_eq!(sequences.len(), unitigs.num_nodes());
    let file = File::create(path)
        .with_context(|| format!("failed to create output graph {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut lengths = Vec::with_capacity(sequences.len());
    for (i, sequence) in sequences.iter().enumerate() {
        let mut expanded = String::new();
        for (j, &id) in sequence.expanded_ids.iter().enumerate() {
            expanded.push_str(strings.get(sequence.codes[j], id));
        }
        let coverage = unitigs.average_coverage(i);
        writeln!(
            writer,
            "S\t{}\t{}\tll:f:{}\tFC:f:{}",
            i,
            expanded,
            coverage,
            coverage * expanded.len() as f64
        )?;
        lengths.push(expanded.len());
    }
    for i in 0..unitigs.num_nodes() {
        for forward in [true, false] {
            let from = NodePos::new(i, forward);
            let mut targets: Vec<NodePos> = unitigs.edges[from].iter().copied().collect();
            targets.sort_unstable();
            for to in targets {
                // the k-mers actually joined by this unitig adjacency
                let last = if forward {
                    *unitigs.unitigs[i].last().expect("unitig is non-empty")
                } else {
                    unitigs.unitigs[i][0].reverse()
                };
                let first = if to.forward {
                    unitigs.unitigs[to.id][0]
                } else {
                    unitigs.unitigs[to.id]
                        .last()
                        .expect("unitig is non-empty")
                        .reverse()
                };
                let overlap = expanded_overlap(index, last, first);
                writeln!(
                    writer,
                    "L\t{}\t{}\t{}\t{}\t{}M\tec:i:{}",
                    i,
                    orientation(forward),
                    to.id,
                    orientation(to.forward),
                    overlap,
                    unitigs.edge_coverage(from, to)
                )?;
            }
        }
    }
    writer.flush()?;
    info!(
        "wrote {} segments and their links to {}",
        sequences.len(),
        path.display()
    );
    Ok(lengths)
}
