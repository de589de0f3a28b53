//! # minitig
//!
//! A de Bruijn-like genome graph assembler for long, noisy reads. Reads are
//! homopolymer-compressed, sketched with minimizer-anchored k-mers, and
//! contracted into a unitig graph with per-unitig consensus sequences,
//! written as GFA-style S/L lines.

pub mod assembly;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export the types most callers need.
pub use crate::assembly::consensus::{build_consensus, ConsensusMaker, StringIndex};
pub use crate::assembly::kmer_index::{index_reads, KmerIndex};
pub use crate::assembly::transitive::clean_transitive_edges;
pub use crate::assembly::unitig::UnitigGraph;
pub use crate::config::AssemblyOptions;
pub use crate::core::bidirected::{canon, NodePos};

/// Result type used throughout the crate.
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate.
pub type Error = anyhow::Error;
