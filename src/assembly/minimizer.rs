//! Sliding-window minimizer scanner.
//!
//! For every window of `w` consecutive k-mers the scanner emits each k-mer
//! whose strand-symmetric hash equals the window minimum. Ties are emitted
//! too: dropping them would make the anchor set fragile against single-base
//! differences between overlapping reads.
//!
//! Guarantees: emissions are strictly increasing in position, consecutive
//! emissions are at most `w` positions apart, and between two emissions
//! every intermediate window had a strictly larger minimum.

use std::collections::VecDeque;

use crate::core::rolling_hash::RollingHasher;

struct WindowEntry {
    pos: usize,
    hash: u64,
    fw_hash: u64,
    bw_hash: u64,
}

/// Scan `seq` (encoded base codes) and call `emit(position, fw_hash, bw_hash)`
/// for every minimizer occurrence.
pub fn scan_minimizers<F>(seq: &[u8], k: usize, w: usize, mut emit: F)
where
    F: FnMut(usize, u64, u64),
{
    if seq.len() < k + w {
        return;
    }
    let mut hasher = RollingHasher::new(k);
    for &c in &seq[..k] {
        hasher.add(c);
    }
    // monotonic deque over the first window
    let mut window: VecDeque<WindowEntry> = VecDeque::new();
    window.push_back(WindowEntry {
        pos: 0,
        hash: hasher.hash(),
        fw_hash: hasher.fw_hash(),
        bw_hash: hasher.bw_hash(),
    });
    for i in 0..w - 1 {
        let seq_pos = k + i;
        hasher.add(seq[seq_pos]);
        hasher.remove(seq[seq_pos - k]);
        let hash = hasher.hash();
        while window.back().is_some_and(|e| e.hash > hash) {
            window.pop_back();
        }
        window.push_back(WindowEntry {
            pos: i + 1,
            hash,
            fw_hash: hasher.fw_hash(),
            bw_hash: hasher.bw_hash(),
        });
    }
    // ties sit contiguously at the front of the monotonic deque
    let front_hash = window.front().expect("first window is non-empty").hash;
    for entry in window.iter() {
        if entry.hash != front_hash {
            break;
        }
        emit(entry.pos, entry.fw_hash, entry.bw_hash);
    }
    for i in w - 1.. {
        let seq_pos = k + i;
        if seq_pos >= seq.len() {
            break;
        }
        hasher.add(seq[seq_pos]);
        hasher.remove(seq[seq_pos - k]);
        let old_minimum = window.front().expect("window tracks w entries").hash;
        let hash = hasher.hash();
        while window.front().is_some_and(|e| e.pos + w <= i + 1) {
            window.pop_front();
        }
        while window.back().is_some_and(|e| e.hash > hash) {
            window.pop_back();
        }
        if let Some(front) = window.front() {
            if front.hash != old_minimum {
                let new_minimum = front.hash;
                for entry in window.iter() {
                    if entry.hash != new_minimum {
                        break;
                    }
                    emit(entry.pos, entry.fw_hash, entry.bw_hash);
                }
            }
        }
        if window.front().is_none_or(|e| e.hash == hash) {
            emit(i + 1, hasher.fw_hash(), hasher.bw_hash());
        }
        window.push_back(WindowEntry {
            pos: i + 1,
            hash,
            fw_hash: hasher.fw_hash(),
            bw_hash: hasher.bw_hash(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoding::{encode_sequence, reverse_complement};

    fn positions(seq: &[u8], k: usize, w: usize) -> Vec<usize> {
        let mut out = Vec::new();
        scan_minimizers(seq, k, w, |pos, _, _| out.push(pos));
        out
    }

    #[test]
    fn short_sequences_yield_nothing() {
        let (codes, _) = encode_sequence(b"ACGTACG", false).unwrap();
        // length exactly k + w - 1: not a single full window
        assert!(positions(&codes, 5, 3).is_empty());
    }

    #[test]
    fn minimal_window_emits_at_least_once() {
        let (codes, _) = encode_sequence(b"ACGTACGG", false).unwrap();
        // length exactly k + w: two windows over four k-mers
        let emitted = positions(&codes, 5, 3);
        assert!(!emitted.is_empty());
        assert!(emitted.len() <= 4);
        assert!(emitted.iter().all(|&p| p < 4));
    }

    #[test]
    fn emissions_are_increasing_and_at_most_w_apart() {
        let (codes, _) =
            encode_sequence(b"GCACGAAACTTGTTGGCCCAGTGTGAATCG", false).unwrap();
        for w in 1..=6 {
            let emitted = positions(&codes, 5, w);
            assert!(!emitted.is_empty());
            for pair in emitted.windows(2) {
                assert!(pair[1] > pair[0]);
                assert!(pair[1] - pair[0] <= w, "w={w} gap {}..{}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn window_of_one_emits_every_position() {
        let (codes, _) = encode_sequence(b"ACGGTCAGTCCTAAGC", false).unwrap();
        let emitted = positions(&codes, 5, 1);
        let expected: Vec<usize> = (0..codes.len() - 5 + 1).collect();
        assert_eq!(emitted, expected);
    }

    #[test]
    fn emitted_positions_mirror_on_reverse_complement() {
        let (codes, _) =
            encode_sequence(b"GCACGAAACTTGTTGGCCCAGTGTGAATCG", false).unwrap();
        let rev = reverse_complement(&codes);
        let k = 5;
        let fwd = positions(&codes, k, 3);
        let mut mirrored: Vec<usize> = positions(&rev, k, 3)
            .into_iter()
            .map(|p| codes.len() - k - p)
            .collect();
        mirrored.sort_unstable();
        let mut fwd_sorted = fwd;
        fwd_sorted.sort_unstable();
        assert_eq!(fwd_sorted, mirrored);
    }
}
