use crate::DedupFilter;
use async_trait::async_trait;
use errors::{DedupError, Result};
use md5::{Digest, Md5};
use std::sync::RwLock;

const MIN_BIT_SIZE: u64 = 8;
const MAX_BIT_SIZE: u64 = 1 << 33;

/// Local bloom filter over a power-of-two bit array.
///
/// Each membership test derives `k` sub-hashes by iteratively re-hashing
/// the element's md5 digest and slicing fixed 8-byte chunks, each masked
/// into `[0, m)`.
pub struct MemoryBloom {
    bits: RwLock<Vec<u64>>,
    bit_size: u64,
    hash_rounds: u32,
}

impl MemoryBloom {
    /// `bit_size` must be a power of two in `[8, 2^33]`.
    pub fn new(bit_size: u64, hash_rounds: u32) -> Result<Self> {
        if !(MIN_BIT_SIZE..=MAX_BIT_SIZE).contains(&bit_size) || !bit_size.is_power_of_two() {
            return Err(DedupError::InvalidBitSize(bit_size).into());
        }
        let words = (bit_size / 64).max(1) as usize;
        Ok(MemoryBloom {
            bits: RwLock::new(vec![0u64; words]),
            bit_size,
            hash_rounds: hash_rounds.max(1),
        })
    }

    /// Sizes the filter for `expected_items` at `fp_rate`, rounding the
    /// bit count up to the next power of two.
    pub fn with_capacity(expected_items: u64, fp_rate: f64) -> Result<Self> {
        let m = crate::optimal_bit_size(expected_items, fp_rate)
            .next_power_of_two()
            .clamp(MIN_BIT_SIZE, MAX_BIT_SIZE);
        let k = crate::optimal_hash_rounds(m, expected_items.max(1));
        MemoryBloom::new(m, k)
    }

    fn bit_positions(&self, element: &str) -> Vec<u64> {
        let mask = self.bit_size - 1;
        let mut positions = Vec::with_capacity(self.hash_rounds as usize);

        let mut digest: [u8; 16] = {
            let mut hasher = Md5::new();
            hasher.update(element.as_bytes());
            hasher.finalize().into()
        };
        let mut offset = 0usize;

        while positions.len() < self.hash_rounds as usize {
            if offset + 8 > digest.len() {
                // Chunk budget of this digest exhausted, re-hash it.
                let mut hasher = Md5::new();
                hasher.update(digest);
                digest = hasher.finalize().into();
                offset = 0;
            }
            let chunk: [u8; 8] = digest[offset..offset + 8].try_into().unwrap();
            positions.push(u64::from_be_bytes(chunk) & mask);
            offset += 8;
        }
        positions
    }
}

#[async_trait]
impl DedupFilter for MemoryBloom {
    async fn add(&self, element: &str) -> Result<()> {
        let positions = self.bit_positions(element);
        let mut bits = self.bits.write().unwrap();
        for pos in positions {
            bits[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
        Ok(())
    }

    async fn has(&self, element: &str) -> Result<bool> {
        let positions = self.bit_positions(element);
        let bits = self.bits.read().unwrap();
        Ok(positions
            .iter()
            .all(|pos| bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0))
    }

    async fn clear(&self) -> Result<()> {
        let mut bits = self.bits.write().unwrap();
        bits.iter_mut().for_each(|word| *word = 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_false_negatives() {
        let bloom = MemoryBloom::new(1 << 16, 7).unwrap();
        for i in 0..500 {
            let url = format!("http://example.com/page/{i}");
            assert!(!bloom.has(&url).await.unwrap(), "unseen url reported seen");
            bloom.add(&url).await.unwrap();
            assert!(bloom.has(&url).await.unwrap(), "seen url reported unseen");
        }
        // Everything added stays visible.
        for i in 0..500 {
            let url = format!("http://example.com/page/{i}");
            assert!(bloom.has(&url).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_bounded_false_positives() {
        // 2^20 bits, 7 rounds, 1000 items: fp rate is far below 1%.
        let bloom = MemoryBloom::new(1 << 20, 7).unwrap();
        for i in 0..1000 {
            bloom.add(&format!("http://a.com/{i}")).await.unwrap();
        }
        let mut false_positives = 0;
        for i in 0..1000 {
            if bloom.has(&format!("http://b.com/{i}")).await.unwrap() {
                false_positives += 1;
            }
        }
        assert!(false_positives < 10, "fp count {false_positives}");
    }

    #[tokio::test]
    async fn test_clear() {
        let bloom = MemoryBloom::new(1 << 12, 3).unwrap();
        bloom.add("http://example.com").await.unwrap();
        bloom.clear().await.unwrap();
        assert!(!bloom.has("http://example.com").await.unwrap());
    }

    #[test]
    fn test_invalid_bit_size() {
        assert!(MemoryBloom::new(0, 3).is_err());
        assert!(MemoryBloom::new(7, 3).is_err());
        assert!(MemoryBloom::new(1000, 3).is_err()); // not a power of two
        assert!(MemoryBloom::new(1 << 34, 3).is_err());
    }

    #[test]
    fn test_with_capacity_rounds_to_power_of_two() {
        let bloom = MemoryBloom::with_capacity(100_000, 0.01).unwrap();
        assert!(bloom.bit_size.is_power_of_two());
    }
}
