//! Probabilistic URL de-duplication: no false negatives, bounded false
//! positives, no removal. Local bit-array and shared redis bitmap
//! variants share the interface; the shared variant also shares the
//! exact bit positions, so filters written by one process are readable
//! by any other.

pub mod memory;
pub mod redis_bloom;

pub use memory::MemoryBloom;
pub use redis_bloom::RedisBloom;

use async_trait::async_trait;
use errors::Result;

#[async_trait]
pub trait DedupFilter: Send + Sync {
    /// Marks an element as seen.
    async fn add(&self, element: &str) -> Result<()>;

    /// True when the element may have been seen before. False means it
    /// definitely has not.
    async fn has(&self, element: &str) -> Result<bool>;

    /// Drops the whole bucket. Called at producer shutdown.
    async fn clear(&self) -> Result<()>;
}

/// `m = -n·ln(p) / (ln 2)²`, rounded up.
pub fn optimal_bit_size(expected_items: u64, fp_rate: f64) -> u64 {
    let n = expected_items as f64;
    let ln2 = std::f64::consts::LN_2;
    (-n * fp_rate.ln() / (ln2 * ln2)).ceil() as u64
}

/// `k = (m/n)·ln 2`, at least one round.
pub fn optimal_hash_rounds(bit_size: u64, expected_items: u64) -> u32 {
    let k = (bit_size as f64 / expected_items as f64) * std::f64::consts::LN_2;
    (k.round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimal_parameters() {
        // 1M items at 1% fp: ~9.59M bits, 7 rounds.
        let m = optimal_bit_size(1_000_000, 0.01);
        assert!((9_500_000..9_700_000).contains(&m));
        assert_eq!(optimal_hash_rounds(m, 1_000_000), 7);
    }

    #[test]
    fn test_rounds_never_zero() {
        assert_eq!(optimal_hash_rounds(8, 1_000_000), 1);
    }
}
