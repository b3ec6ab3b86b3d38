use crate::DedupFilter;
use async_trait::async_trait;
use common::model::config::{DedupConfig, RedisConfig};
use errors::{DedupError, Result};
use log::info;
use metrics::counter;
use utils::hash::md5_hex;

/// Bloom filter over a shared redis bitmap.
///
/// Bit positions are `crc32(md5("m" + round + element)) % m`, identical
/// for every process writing the same namespace, so independent workers
/// share one filter. All k bit operations of one call go out as a single
/// pipelined batch.
pub struct RedisBloom {
    pool: deadpool_redis::Pool,
    key: String,
    bit_size: u64,
    hash_rounds: u32,
}

impl RedisBloom {
    pub fn new(
        redis_config: &RedisConfig,
        namespace: &str,
        bit_size: u64,
        hash_rounds: u32,
    ) -> Result<Self> {
        if bit_size == 0 {
            return Err(DedupError::InvalidBitSize(bit_size).into());
        }
        let pool = utils::connector::create_redis_pool(
            &redis_config.redis_host,
            redis_config.redis_port,
            redis_config.redis_db,
            &redis_config.redis_username,
            &redis_config.redis_password,
            redis_config.pool_size,
        )
        .ok_or_else(|| {
            DedupError::ConnectionFailed("failed to create redis pool".to_string().into())
        })?;

        Ok(RedisBloom {
            pool,
            key: format!("{namespace}:dedup:bloom"),
            bit_size,
            hash_rounds: hash_rounds.max(1),
        })
    }

    /// Builds the filter from configuration: explicit (m, k) win, else
    /// they are derived from (expected_items, fp_rate).
    pub fn from_config(cfg: &DedupConfig, namespace: &str) -> Result<Self> {
        let redis = cfg.redis.as_ref().ok_or_else(|| {
            DedupError::ConnectionFailed("dedup.redis missing".to_string().into())
        })?;

        let (bit_size, hash_rounds) = match (cfg.bit_size, cfg.hash_rounds) {
            (Some(m), Some(k)) => (m, k),
            _ => {
                let n = cfg.expected_items.unwrap_or(1_000_000);
                let p = cfg.fp_rate.unwrap_or(0.01);
                let m = crate::optimal_bit_size(n, p);
                let k = crate::optimal_hash_rounds(m, n);
                info!("derived bloom parameters: n={n} p={p} -> m={m} k={k}");
                (m, k)
            }
        };

        RedisBloom::new(redis, namespace, bit_size, hash_rounds)
    }

    fn bit_positions(&self, element: &str) -> Vec<u64> {
        (0..self.hash_rounds)
            .map(|round| {
                let digest = md5_hex(format!("m{round}{element}").as_bytes());
                crc32fast::hash(digest.as_bytes()) as u64 % self.bit_size
            })
            .collect()
    }
}

#[async_trait]
impl DedupFilter for RedisBloom {
    async fn add(&self, element: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| {
            DedupError::ConnectionFailed(Box::new(e))
        })?;

        let mut pipe = redis::pipe();
        for pos in self.bit_positions(element) {
            pipe.cmd("SETBIT").arg(&self.key).arg(pos).arg(1).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DedupError::OperationFailed(Box::new(e)))?;
        counter!("dedup_bloom_add").increment(1);
        Ok(())
    }

    async fn has(&self, element: &str) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| {
            DedupError::ConnectionFailed(Box::new(e))
        })?;

        let mut pipe = redis::pipe();
        for pos in self.bit_positions(element) {
            pipe.cmd("GETBIT").arg(&self.key).arg(pos);
        }
        let bits: Vec<u8> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DedupError::OperationFailed(Box::new(e)))?;

        let seen = bits.iter().all(|bit| *bit == 1);
        counter!("dedup_bloom_check", "result" => if seen { "maybe_seen" } else { "new" })
            .increment(1);
        Ok(seen)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| {
            DedupError::ConnectionFailed(Box::new(e))
        })?;
        let _: () = redis::cmd("DEL")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| DedupError::OperationFailed(Box::new(e)))?;
        info!("cleared dedup bucket {}", self.key);
        Ok(())
    }
}
