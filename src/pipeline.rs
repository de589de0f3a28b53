//! Top-level assembly pipeline.
//!
//! Phases run strictly in sequence with a join barrier between them: read
//! ingestion (multithreaded), transitive edge cleaning, unitig contraction,
//! the optional unitig coverage filter, the consensus pass (multithreaded)
//! and the graph writer. Each phase is all-or-nothing; a failure surfaces
//! with the phase named in the error chain.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::assembly::consensus::build_consensus;
use crate::assembly::kmer_index::index_reads;
use crate::assembly::transitive::clean_transitive_edges;
use crate::assembly::unitig::UnitigGraph;
use crate::config::AssemblyOptions;
use crate::io::gfa::write_graph;

/// Total assembled size and N50 over the expanded unitig lengths.
fn size_and_n50(lengths: &[usize]) -> (usize, usize) {
    let total: usize = lengths.iter().sum();
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let mut partial = 0usize;
    for &length in sorted.iter().rev() {
        partial += length;
        if partial * 2 >= total {
            return (total, length);
        }
    }
    (total, 0)
}

/// Run the whole assembly described by `options`.
pub fn run(options: &AssemblyOptions) -> Result<()> {
    let k = options.kmer_size;
    let w = options.window_size;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .thread_name(|i| format!("minitig-{i}"))
        .build()
        .context("failed to build the worker thread pool")?;
    info!(
        "assembling with k={}, w={}, hpc={}, {} threads",
        k, w, options.hpc, options.threads
    );

    let start = Instant::now();
    let mut index = index_reads(&options.reads, k, w, options.hpc, &pool)
        .context("while reading and hashing input reads")?;
    info!("reading and hashing sequences took {:.2?}", start.elapsed());

    let phase = Instant::now();
    clean_transitive_edges(&mut index, k);
    info!("cleaning transitive edges took {:.2?}", phase.elapsed());

    let phase = Instant::now();
    let mut unitigs = UnitigGraph::from_kmer_index(&index, options.min_coverage);
    info!("unitigifying took {:.2?}", phase.elapsed());

    if options.min_unitig_coverage > options.min_coverage as f64 {
        let phase = Instant::now();
        unitigs = unitigs
            .filter_by_coverage(options.min_unitig_coverage)
            .merge_linear_paths();
        info!("filtering unitigs took {:.2?}", phase.elapsed());
    }

    if unitigs.num_nodes() == 0 {
        warn!("no k-mers survived the coverage filter; writing an empty graph");
    }

    let phase = Instant::now();
    let (sequences, strings) =
        build_consensus(&options.reads, &index, &unitigs, w, options.hpc, &pool)
            .context("while building unitig consensus")?;
    info!("building consensus took {:.2?}", phase.elapsed());

    let phase = Instant::now();
    let lengths = write_graph(&options.output, &unitigs, &index, &sequences, &strings)
        .context("while writing the output graph")?;
    info!("writing the graph took {:.2?}", phase.elapsed());

    let (total, n50) = size_and_n50(&lengths);
    info!("nodes: {}", unitigs.num_nodes());
    info!("edges: {}", unitigs.num_edges());
    info!("assembly size {} bp, N50 {}", total, n50);
    if unitigs.num_nodes() > 0 {
        let per_node = k.saturating_sub(w / 2 + 1);
        info!(
            "approximate number of k-mers ~ {}",
            total.saturating_sub(unitigs.num_nodes() * per_node)
        );
    }
    info!("total time {:.2?}", start.elapsed());
    Ok(())
}
