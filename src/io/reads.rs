//! Streaming read source for FASTA/FASTQ files, plain or gzipped.

use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;
use tracing::debug;

/// One input read: record id plus raw sequence bytes.
#[derive(Debug, Clone)]
pub struct SequenceRead {
    pub id: String,
    pub sequence: Vec<u8>,
}

/// Default number of reads handed to the worker pool at a time.
pub const READ_BATCH_SIZE: usize = 4096;

/// Stream `path` in batches of at most `batch_size` reads.
///
/// Format (FASTA/FASTQ) and compression are detected from the file content;
/// a malformed record aborts with the file in the error chain.
pub fn stream_read_batches<F>(path: &Path, batch_size: usize, mut handle: F) -> Result<()>
where
    F: FnMut(Vec<SequenceRead>) -> Result<()>,
{
    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("failed to open read file {}", path.display()))?;
    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;
    while let Some(record) = reader.next() {
        let record = record
            .with_context(|| format!("malformed record in {}", path.display()))?;
        batch.push(SequenceRead {
            id: String::from_utf8_lossy(record.id()).into_owned(),
            sequence: record.seq().into_owned(),
        });
        total += 1;
        if batch.len() >= batch_size {
            handle(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
        }
    }
    if !batch.is_empty() {
        handle(batch)?;
    }
    debug!("streamed {} reads from {}", total, path.display());
    Ok(())
}
