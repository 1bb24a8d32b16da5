//! Content-defined chunking with a rolling hash.
//!
//! The hash covers a fixed window of the most recent bytes and is kept as
//! four polynomial sums, each updated in constant time as one byte enters
//! and one leaves the window. A cut is declared once the chunk has reached
//! the minimum size and the low `blob_bits` bits of the digest are all ones,
//! or unconditionally at the maximum size. The number of trailing one bits
//! is the cut strength, which the splitter uses to pick an index level.

use crate::config::SplitConfig;
use std::fmt;
use std::sync::Arc;

/// Deterministic transform applied to the digest before testing for a cut.
pub type ChunkPermutation = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

/// Added to every byte so runs of zeros still move the sums.
const CHAR_OFFSET: u64 = 31;

/// Odd multipliers, one per polynomial sum.
const MULTIPLIERS: [u64; 4] = [
    0x0000_0100_0000_01b3,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
];

/// A cut point reported by [`RollingHash::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cut {
    /// Number of bytes of the fed slice that belong to the chunk.
    pub offset: usize,
    /// Trailing one bits of the digest at the cut.
    pub strength: u32,
}

/// Rolling hash over a sliding window.
pub struct RollingHash {
    window: Vec<u8>,
    pos: usize,
    sums: [u64; 4],
    initial_sums: [u64; 4],
    // B^window_size for each multiplier: the weight of the byte leaving.
    drop_factors: [u64; 4],
    length: usize,
    min_length: usize,
    max_length: usize,
    blob_mask: u64,
    permutation: Option<ChunkPermutation>,
}

impl RollingHash {
    /// Create a rolling hash for a validated configuration.
    pub fn new(config: &SplitConfig) -> Self {
        let window_size = config.window_size;
        let mut drop_factors = [1u64; 4];
        let mut initial_sums = [0u64; 4];
        for k in 0..4 {
            for _ in 0..window_size {
                // The initial window holds zero bytes.
                initial_sums[k] = initial_sums[k]
                    .wrapping_mul(MULTIPLIERS[k])
                    .wrapping_add(CHAR_OFFSET);
                drop_factors[k] = drop_factors[k].wrapping_mul(MULTIPLIERS[k]);
            }
        }

        Self {
            window: vec![0; window_size],
            pos: 0,
            sums: initial_sums,
            initial_sums,
            drop_factors,
            length: 0,
            min_length: config.min_chunk_size,
            max_length: config.max_chunk_size,
            blob_mask: (1u64 << config.blob_bits) - 1,
            permutation: None,
        }
    }

    /// Apply `permutation` to every digest before the cut test.
    pub fn with_permutation(mut self, permutation: ChunkPermutation) -> Self {
        self.permutation = Some(permutation);
        self
    }

    /// Restore the initial window and sums.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.pos = 0;
        self.sums = self.initial_sums;
        self.length = 0;
    }

    /// Bytes fed since the last reset.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Consume bytes until a cut is found.
    ///
    /// Returns `None` when all of `data` was consumed without a cut. After a
    /// cut the caller must [`reset`](Self::reset) and feed the bytes that
    /// follow `offset` again.
    pub fn feed(&mut self, data: &[u8]) -> Option<Cut> {
        for (i, &byte) in data.iter().enumerate() {
            self.roll(byte);
            self.length += 1;

            if self.length < self.min_length {
                continue;
            }

            let digest = self.digest();
            if digest & self.blob_mask == self.blob_mask || self.length >= self.max_length {
                return Some(Cut {
                    offset: i + 1,
                    strength: digest.trailing_ones(),
                });
            }
        }
        None
    }

    /// Current digest of the window, after the permutation if one is set.
    pub fn digest(&self) -> u64 {
        let raw = self.raw_digest();
        match &self.permutation {
            Some(permutation) => permutation(raw),
            None => raw,
        }
    }

    fn raw_digest(&self) -> u64 {
        let combined = self.sums[0]
            ^ self.sums[1].rotate_left(16)
            ^ self.sums[2].rotate_left(32)
            ^ self.sums[3].rotate_left(48);
        mix64(combined)
    }

    fn roll(&mut self, byte: u8) {
        let outgoing = u64::from(self.window[self.pos]) + CHAR_OFFSET;
        let incoming = u64::from(byte) + CHAR_OFFSET;
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) & (self.window.len() - 1);

        for k in 0..4 {
            self.sums[k] = self.sums[k]
                .wrapping_mul(MULTIPLIERS[k])
                .wrapping_add(incoming)
                .wrapping_sub(outgoing.wrapping_mul(self.drop_factors[k]));
        }
    }
}

impl fmt::Debug for RollingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingHash")
            .field("window_size", &self.window.len())
            .field("length", &self.length)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("permuted", &self.permutation.is_some())
            .finish()
    }
}

// 64-bit finalizer: spreads every input bit over the low bits tested for cuts.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    fn small_config() -> SplitConfig {
        SplitConfig {
            min_chunk_size: 64,
            max_chunk_size: 1024,
            blob_bits: 6,
            ..SplitConfig::default()
        }
    }

    #[test]
    fn test_digest_depends_only_on_window() {
        let config = SplitConfig {
            min_chunk_size: usize::MAX / 2,
            max_chunk_size: usize::MAX / 2,
            ..SplitConfig::default()
        };
        let tail = random_bytes(1, 200);

        let mut a = RollingHash::new(&config);
        a.feed(&random_bytes(2, 500));
        a.feed(&tail);

        let mut b = RollingHash::new(&config);
        b.feed(&random_bytes(3, 77));
        b.feed(&tail);

        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_no_cut_before_min_length() {
        let config = SplitConfig::default();
        let mut hash = RollingHash::new(&config).with_permutation(Arc::new(|_| u64::MAX));

        let cut = hash.feed(&random_bytes(4, 10_000)).unwrap();
        assert_eq!(cut.offset, config.min_chunk_size);
        assert_eq!(cut.strength, 64);
    }

    #[test]
    fn test_forced_cut_at_max_length() {
        let config = SplitConfig::default();
        let mut hash = RollingHash::new(&config).with_permutation(Arc::new(|_| 0));

        let cut = hash.feed(&random_bytes(5, 100_000)).unwrap();
        assert_eq!(cut.offset, config.max_chunk_size);
        assert_eq!(cut.strength, 0);
    }

    #[test]
    fn test_cut_strength_meets_blob_bits() {
        let config = small_config();
        let data = random_bytes(6, 200_000);
        let mut hash = RollingHash::new(&config);

        let mut rest = &data[..];
        let mut cuts = 0;
        while let Some(cut) = hash.feed(rest) {
            if hash.length() < config.max_chunk_size {
                assert!(cut.strength >= config.blob_bits);
            }
            assert!(hash.length() >= config.min_chunk_size);
            assert!(hash.length() <= config.max_chunk_size);
            rest = &rest[cut.offset..];
            hash.reset();
            cuts += 1;
        }
        assert!(cuts > 10, "expected many cuts, got {}", cuts);
    }

    #[test]
    fn test_streaming_matches_single_feed() {
        let config = small_config();
        let data = random_bytes(7, 5_000);

        let mut whole = RollingHash::new(&config);
        let expected = whole.feed(&data).unwrap();

        let mut streamed = RollingHash::new(&config);
        let mut consumed = 0;
        let mut found = None;
        for piece in data.chunks(13) {
            if let Some(cut) = streamed.feed(piece) {
                found = Some(consumed + cut.offset);
                break;
            }
            consumed += piece.len();
        }

        assert_eq!(found, Some(expected.offset));
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let config = small_config();
        let data = random_bytes(8, 5_000);

        let mut hash = RollingHash::new(&config);
        let first = hash.feed(&data);
        hash.reset();
        assert_eq!(hash.length(), 0);
        assert_eq!(hash.feed(&data), first);
    }

    #[test]
    fn test_permutation_changes_boundaries() {
        let config = small_config();
        let data = random_bytes(9, 50_000);

        let mut plain = RollingHash::new(&config);
        let mut permuted =
            RollingHash::new(&config).with_permutation(Arc::new(|d| d.rotate_left(7) ^ 0x5555));

        let mut plain_offsets = Vec::new();
        let mut rest = &data[..];
        while let Some(cut) = plain.feed(rest) {
            plain_offsets.push(cut.offset);
            rest = &rest[cut.offset..];
            plain.reset();
        }

        let mut permuted_offsets = Vec::new();
        let mut rest = &data[..];
        while let Some(cut) = permuted.feed(rest) {
            permuted_offsets.push(cut.offset);
            rest = &rest[cut.offset..];
            permuted.reset();
        }

        assert_ne!(plain_offsets, permuted_offsets);
    }
}
