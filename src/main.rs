use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use minitig::config::AssemblyOptions;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Build a minimizer-anchored de Bruijn unitig graph from long reads.
#[derive(Parser, Debug)]
#[command(name = "minitig", version, about)]
struct Cli {
    /// Input read files (FASTA/FASTQ, plain or gzipped)
    #[arg(required = true)]
    reads: Vec<PathBuf>,

    /// Output graph file (GFA)
    #[arg(short, long)]
    output: PathBuf,

    /// Minimizer k-mer size (odd)
    #[arg(short = 'k', long = "kmer-size")]
    kmer_size: usize,

    /// Minimizer window size
    #[arg(short = 'w', long = "window-size")]
    window_size: usize,

    /// Discard k-mers and edges seen fewer times than this
    #[arg(long, default_value_t = 1)]
    min_coverage: usize,

    /// Discard unitigs whose average coverage is below this
    #[arg(long, default_value_t = 0.0)]
    min_unitig_coverage: f64,

    /// Homopolymer-compress reads before indexing
    #[arg(long)]
    hpc: bool,

    /// Worker threads (defaults to all cores)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .init();

    let options = AssemblyOptions {
        reads: cli.reads,
        output: cli.output,
        kmer_size: cli.kmer_size,
        window_size: cli.window_size,
        min_coverage: cli.min_coverage,
        min_unitig_coverage: cli.min_unitig_coverage,
        hpc: cli.hpc,
        threads: cli.threads.unwrap_or_else(num_cpus::get),
    };
    options.validate()?;
    minitig::pipeline::run(&options)
}
