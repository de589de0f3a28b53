//! Base codes and run-length encoding of DNA sequences.
//!
//! Internally every base is a small integer code: 0 is "unset", 1=A, 2=C,
//! 3=G, 4=T. The complement of a code is `5 - code` (0 stays 0). Reads are
//! encoded once on ingestion, either position-per-base or homopolymer
//! compressed, and expanded back to ACGT text only when the graph is written.

use anyhow::{anyhow, Result};

/// Number of distinct base codes including the "unset" sentinel.
pub const CODE_RANGE: usize = 5;

const COMPLEMENT: [u8; CODE_RANGE] = [0, 4, 3, 2, 1];
const DECODE: [char; CODE_RANGE] = ['-', 'A', 'C', 'G', 'T'];

/// Complement of a base code (`5 - code`; 0 complements to 0).
#[inline]
pub fn complement(code: u8) -> u8 {
    COMPLEMENT[code as usize]
}

/// ASCII character for a base code.
#[inline]
pub fn decode_base(code: u8) -> char {
    DECODE[code as usize]
}

#[inline]
fn encode_base(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(1),
        b'C' | b'c' => Some(2),
        b'G' | b'g' => Some(3),
        b'T' | b't' => Some(4),
        _ => None,
    }
}

/// Encode a raw read into base codes and per-position run lengths.
///
/// With `hpc` set, adjacent identical bases collapse into one code whose run
/// length is the homopolymer length; otherwise every position keeps run
/// length 1. Characters outside ACGT (any case) are input format violations.
pub fn encode_sequence(raw: &[u8], hpc: bool) -> Result<(Vec<u8>, Vec<u16>)> {
    if raw.is_empty() {
        return Err(anyhow!("empty sequence"));
    }
    let mut codes = Vec::with_capacity(raw.len());
    let mut lengths: Vec<u16> = Vec::with_capacity(raw.len());
    for (i, &base) in raw.iter().enumerate() {
        let code = encode_base(base)
            .ok_or_else(|| anyhow!("invalid base {:?} at position {}", base as char, i))?;
        if hpc && codes.last() == Some(&code) {
            let last = lengths
                .last_mut()
                .expect("run lengths track codes");
            *last = (*last).saturating_add(1);
        } else {
            codes.push(code);
            lengths.push(1);
        }
    }
    Ok((codes, lengths))
}

/// Reverse complement of an encoded (RLE) sequence.
pub fn reverse_complement(codes: &[u8]) -> Vec<u8> {
    codes.iter().rev().map(|&c| complement(c)).collect()
}

/// Expand an encoded sequence back into ACGT text using its run lengths.
pub fn expand(codes: &[u8], lengths: &[u16]) -> String {
    debug_assert_eq!(codes.len(), lengths.len());
    let total: usize = lengths.iter().map(|&l| l as usize).sum();
    let mut result = String::with_capacity(total);
    for (&code, &len) in codes.iter().zip(lengths) {
        for _ in 0..len {
            result.push(decode_base(code));
        }
    }
    result
}
