//! Assembly options and validation.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Everything the pipeline needs to run, validated once up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyOptions {
    /// Input read files (FASTA/FASTQ, plain or gzipped).
    pub reads: Vec<PathBuf>,
    /// Output graph path.
    pub output: PathBuf,
    /// Minimizer k-mer size; must be odd so no k-mer is its own reverse
    /// complement.
    pub kmer_size: usize,
    /// Minimizer window size (w consecutive k-mers).
    pub window_size: usize,
    /// Nodes and edges below this coverage are dropped before unitig
    /// contraction.
    pub min_coverage: usize,
    /// Unitigs below this average coverage are dropped after contraction.
    pub min_unitig_coverage: f64,
    /// Homopolymer-compress the input before indexing.
    pub hpc: bool,
    /// Worker threads for read ingestion and consensus.
    pub threads: usize,
}

impl AssemblyOptions {
    pub fn validate(&self) -> Result<()> {
        if self.reads.is_empty() {
            return Err(anyhow!("no input read files given"));
        }
        if self.kmer_size < 3 || self.kmer_size % 2 == 0 {
            return Err(anyhow!(
                "k-mer size must be odd and at least 3, got {}",
                self.kmer_size
            ));
        }
        if self.window_size == 0 {
            return Err(anyhow!("window size must be at least 1"));
        }
        if self.threads == 0 {
            return Err(anyhow!("thread count must be at least 1"));
        }
        if !self.min_unitig_coverage.is_finite() || self.min_unitig_coverage < 0.0 {
            return Err(anyhow!(
                "minimum unitig coverage must be a non-negative number, got {}",
                self.min_unitig_coverage
            ));
        }
        Ok(())
    }
}
