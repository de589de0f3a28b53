//! Strand-symmetric rolling k-mer hash.
//!
//! ntHash-style recursive hashing: one fixed 64-bit constant per base code,
//! combined with single-bit rotations so that appending and removing a
//! character are O(1). The forward and reverse-complement strands are
//! tracked together and [`RollingHasher::hash`] returns their minimum, so a
//! k-mer and its reverse complement always hash identically.
//!
//! A hasher can also be reseeded from a previously captured `(fw, bw)` pair,
//! which lets rescans of bridging sequences resume with bit-identical state
//! to the original scan.

use crate::core::encoding::{complement, CODE_RANGE};

// https://bioinformatics.stackexchange.com/questions/19/are-there-any-rolling-hash-functions-that-can-hash-a-dna-sequence-and-its-revers
const CODE_HASHES: [u64; CODE_RANGE] = [
    0,
    0x3c8bfbb395c60474, // A
    0x3193c18562a02b4c, // C
    0x20323ed082572324, // G
    0x295549f54be24456, // T
];

#[derive(Debug, Clone)]
pub struct RollingHasher {
    fw_add: [u64; CODE_RANGE],
    fw_remove: [u64; CODE_RANGE],
    bw_add: [u64; CODE_RANGE],
    bw_remove: [u64; CODE_RANGE],
    fw_hash: u64,
    bw_hash: u64,
}

impl RollingHasher {
    /// Fresh hasher for k-mers of size `k`.
    pub fn new(k: usize) -> Self {
        Self::seeded(k, 0, 0)
    }

    /// Hasher whose state is restored from a captured `(fw, bw)` hash pair.
    pub fn seeded(k: usize, fw_hash: u64, bw_hash: u64) -> Self {
        debug_assert!(k >= 1);
        let rot_k = (k % 64) as u32;
        let rot_k_minus_1 = (rot_k + 63) % 64;
        let mut fw_add = [0u64; CODE_RANGE];
        let mut fw_remove = [0u64; CODE_RANGE];
        let mut bw_add = [0u64; CODE_RANGE];
        let mut bw_remove = [0u64; CODE_RANGE];
        for code in 0..CODE_RANGE {
            let comp = complement(code as u8) as usize;
            fw_add[code] = CODE_HASHES[code];
            fw_remove[code] = CODE_HASHES[code].rotate_left(rot_k);
            bw_add[code] = CODE_HASHES[comp].rotate_left(rot_k_minus_1);
            bw_remove[code] = CODE_HASHES[comp].rotate_right(1);
        }
        Self {
            fw_add,
            fw_remove,
            bw_add,
            bw_remove,
            fw_hash,
            bw_hash,
        }
    }

    /// Shift a base code into the window.
    #[inline]
    pub fn add(&mut self, code: u8) {
        self.fw_hash = self.fw_hash.rotate_left(1) ^ self.fw_add[code as usize];
        self.bw_hash = self.bw_hash.rotate_right(1) ^ self.bw_add[code as usize];
    }

    /// Drop the base code that is leaving the window.
    #[inline]
    pub fn remove(&mut self, code: u8) {
        self.fw_hash ^= self.fw_remove[code as usize];
        self.bw_hash ^= self.bw_remove[code as usize];
    }

    /// Strand-symmetric combined hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.fw_hash.min(self.bw_hash)
    }

    #[inline]
    pub fn fw_hash(&self) -> u64 {
        self.fw_hash
    }

    #[inline]
    pub fn bw_hash(&self) -> u64 {
        self.bw_hash
    }
}
