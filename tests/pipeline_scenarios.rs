//! End-to-end pipeline scenarios over temporary read files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use minitig::config::AssemblyOptions;
use minitig::pipeline;
use tempfile::TempDir;

fn write_fasta(path: &Path, reads: &[&str]) {
    let mut file = File::create(path).expect("create fasta");
    for (i, read) in reads.iter().enumerate() {
        writeln!(file, ">read{i}\n{read}").expect("write fasta");
    }
}

fn options(reads: Vec<PathBuf>, output: PathBuf) -> AssemblyOptions {
    AssemblyOptions {
        reads,
        output,
        kmer_size: 5,
        window_size: 3,
        min_coverage: 1,
        min_unitig_coverage: 0.0,
        hpc: false,
        threads: 2,
    }
}

fn reverse_complement(read: &str) -> String {
    read.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            'T' => 'A',
            other => other,
        })
        .collect()
}

fn expand_rle(rle: &str, runs: &[usize]) -> String {
    assert_eq!(rle.len(), runs.len());
    rle.chars()
        .zip(runs)
        .flat_map(|(c, &n)| std::iter::repeat(c).take(n))
        .collect()
}

/// The assembled sequence is anchored at minimizers, so up to `w - 1`
/// positions of the read can be missing from each end; everything kept must
/// match the read (or its reverse complement) exactly.
fn assert_matches_read(sequence: &str, read: &str, max_end_loss: usize) {
    assert!(
        read.contains(sequence) || reverse_complement(read).contains(sequence),
        "unitig sequence is not a read substring: {sequence}"
    );
    assert!(
        sequence.len() + 2 * max_end_loss >= read.len(),
        "unitig sequence lost too much: {} of {}",
        sequence.len(),
        read.len()
    );
}

struct GraphLines {
    segments: Vec<Vec<String>>,
    links: Vec<Vec<String>>,
}

fn parse_graph(path: &Path) -> GraphLines {
    let text = std::fs::read_to_string(path).expect("read graph");
    let mut segments = Vec::new();
    let mut links = Vec::new();
    for line in text.lines() {
        let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
        match fields[0].as_str() {
            "S" => segments.push(fields),
            "L" => links.push(fields),
            other => panic!("unexpected record type {other:?}"),
        }
    }
    GraphLines { segments, links }
}

// a 30 bp read whose canonical 5-mers are all distinct, so it contracts to
// a single clean unitig
const SIMPLE_READ: &str = "GCACGAAACTTGTTGGCCCAGTGTGAATCG";

// a shared 16 bp prefix and two divergent tails; across both reads the
// canonical 5-mers collide only inside the prefix
const PREFIX: &str = "CTGTGTCCACCCCATC";
const TAIL_A: &str = "GGACTGGCATTT";
const TAIL_B: &str = "TTATTACACTCA";

#[test]
fn single_read_becomes_a_single_unitig() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    write_fasta(&reads, &[SIMPLE_READ]);
    pipeline::run(&options(vec![reads], graph.clone())).unwrap();

    let parsed = parse_graph(&graph);
    assert_eq!(parsed.segments.len(), 1);
    assert!(parsed.links.is_empty());
    assert_matches_read(&parsed.segments[0][2], SIMPLE_READ, 2);
    // every k-mer was seen exactly once
    assert_eq!(parsed.segments[0][3], "ll:f:1");
}

#[test]
fn diverging_reads_branch_into_separate_unitigs() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    let read_a = format!("{PREFIX}{TAIL_A}");
    let read_b = format!("{PREFIX}{TAIL_B}");
    write_fasta(&reads, &[&read_a, &read_b].map(String::as_str));
    pipeline::run(&options(vec![reads], graph.clone())).unwrap();

    let parsed = parse_graph(&graph);
    assert!(parsed.segments.len() >= 3, "expected a branch, got {} segments", parsed.segments.len());
    assert!(parsed.links.len() >= 2);
    for link in &parsed.links {
        let overlap: usize = link[5].strip_suffix('M').unwrap().parse().unwrap();
        assert!((1..5).contains(&overlap), "overlap {overlap} out of range");
        let edge_coverage: usize = link[6].strip_prefix("ec:i:").unwrap().parse().unwrap();
        assert!(edge_coverage >= 1);
    }
}

#[test]
fn coverage_filter_removes_the_rare_branch() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    let read_a = format!("{PREFIX}{TAIL_A}");
    let read_b = format!("{PREFIX}{TAIL_B}");
    write_fasta(
        &reads,
        &[&read_a, &read_a, &read_a, &read_a, &read_a, &read_b].map(String::as_str),
    );
    let mut opts = options(vec![reads], graph.clone());
    opts.min_coverage = 2;
    pipeline::run(&opts).unwrap();

    let parsed = parse_graph(&graph);
    assert_eq!(parsed.segments.len(), 1);
    assert!(parsed.links.is_empty());
    assert_matches_read(&parsed.segments[0][2], &read_a, 2);
}

#[test]
fn hpc_assembly_round_trips_the_expanded_read() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    let read = expand_rle(
        "CACGACAGTGCGAC",
        &[1, 2, 1, 3, 1, 1, 2, 1, 1, 1, 2, 1, 1, 3],
    );
    write_fasta(&reads, &[read.as_str()]);
    let mut opts = options(vec![reads], graph.clone());
    opts.hpc = true;
    pipeline::run(&opts).unwrap();

    let parsed = parse_graph(&graph);
    assert_eq!(parsed.segments.len(), 1);
    // up to w-1 = 2 RLE positions may be trimmed per end; the longest run
    // among them is 3 expanded bases
    assert_matches_read(&parsed.segments[0][2], &read, 2 + 3);
}

#[test]
fn concurrent_consensus_is_deterministic_and_majority_voted() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let rle = "CTGAGACGACACGCTCGCAC";
    let mut runs = vec![1usize; rle.len()];
    runs[10] = 2;
    let majority = expand_rle(rle, &runs);
    runs[10] = 3;
    let minority = expand_rle(rle, &runs);
    // two reads vote for a double base at position 10, one for a triple
    write_fasta(&reads, &[&majority, &majority, &minority].map(String::as_str));

    let mut outputs = Vec::new();
    for attempt in 0..2 {
        let graph = dir.path().join(format!("graph{attempt}.gfa"));
        let mut opts = options(vec![reads.clone()], graph.clone());
        opts.hpc = true;
        opts.threads = 8;
        pipeline::run(&opts).unwrap();
        outputs.push(std::fs::read_to_string(&graph).unwrap());
    }
    assert_eq!(outputs[0], outputs[1], "pipeline output is not reproducible");

    let parsed = parse_graph(&dir.path().join("graph0.gfa"));
    assert_eq!(parsed.segments.len(), 1);
    let sequence = &parsed.segments[0][2];
    // a substring of the majority read cannot contain the minority's
    // triple base, and the disputed position sits well inside the unitig
    assert_matches_read(sequence, &majority, 2);
    let canonical = if majority.contains(sequence.as_str()) {
        sequence.clone()
    } else {
        reverse_complement(sequence)
    };
    assert!(
        canonical.contains("GACAACG"),
        "consensus did not follow the majority run length: {sequence}"
    );
}

#[test]
fn too_short_reads_produce_an_empty_graph() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    // shorter than k + w: zero emissions, but still a clean exit
    write_fasta(&reads, &["ACGTAC"]);
    pipeline::run(&options(vec![reads], graph.clone())).unwrap();
    let parsed = parse_graph(&graph);
    assert!(parsed.segments.is_empty());
    assert!(parsed.links.is_empty());
}

#[test]
fn invalid_bases_fail_with_the_record_named() {
    let dir = TempDir::new().unwrap();
    let reads = dir.path().join("reads.fa");
    let graph = dir.path().join("graph.gfa");
    write_fasta(&reads, &[SIMPLE_READ, "ACGTNNACGTACGTAC"]);
    let err = pipeline::run(&options(vec![reads], graph)).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("read1"), "error does not name the record: {chain}");
    assert!(chain.contains("reads.fa"), "error does not name the file: {chain}");
}

#[test]
fn multiple_input_files_are_merged() {
    let dir = TempDir::new().unwrap();
    let reads_a = dir.path().join("a.fa");
    let reads_b = dir.path().join("b.fa");
    let graph = dir.path().join("graph.gfa");
    write_fasta(&reads_a, &[SIMPLE_READ]);
    write_fasta(&reads_b, &[SIMPLE_READ]);
    pipeline::run(&options(vec![reads_a, reads_b], graph.clone())).unwrap();
    let parsed = parse_graph(&graph);
    assert_eq!(parsed.segments.len(), 1);
    assert_matches_read(&parsed.segments[0][2], SIMPLE_READ, 2);
    // both files contributed coverage
    assert_eq!(parsed.segments[0][3], "ll:f:2");
}
