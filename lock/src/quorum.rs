use common::model::config::RedisConfig;
use deadpool_redis::Pool;
use deadpool_redis::redis::Script;
use errors::Result;
use errors::error::LockError;
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use utils::connector::create_redis_pool;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// Clock drift between instances is assumed bounded by 1% of the TTL,
// plus a fixed allowance for the SET round-trips themselves.
const CLOCK_DRIFT_FACTOR: f64 = 0.01;
const DRIFT_OVERHEAD: Duration = Duration::from_millis(2);

/// Proof of a majority acquisition. `validity` is how long the holder
/// may rely on exclusivity: the TTL minus acquisition time and the
/// drift allowance.
#[derive(Debug)]
pub struct QuorumGuard {
    key: String,
    token: String,
    pub validity: Duration,
}

/// Majority-vote mutex over N independent store instances. Acquisition
/// writes a random token with TTL to every instance and succeeds only
/// when at least `⌊N/2⌋+1` accept it while positive valid time remains.
/// An instance whose pool cannot be built is dropped from both the
/// active set and the majority denominator for the process lifetime.
#[derive(Debug)]
pub struct QuorumLock {
    pools: Vec<Pool>,
    quorum: usize,
    namespace: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl QuorumLock {
    pub fn new(instances: &[RedisConfig], namespace: &str) -> Result<Self> {
        let mut pools = Vec::with_capacity(instances.len());
        for instance in instances {
            match create_redis_pool(
                &instance.redis_host,
                instance.redis_port,
                instance.redis_db,
                &instance.redis_username,
                &instance.redis_password,
                instance.pool_size,
            ) {
                Some(pool) => pools.push(pool),
                None => warn!(
                    "dropping unreachable lock instance {}:{}",
                    instance.redis_host, instance.redis_port
                ),
            }
        }
        if pools.is_empty() {
            return Err(LockError::NoInstances.into());
        }
        let quorum = pools.len() / 2 + 1;
        Ok(QuorumLock {
            pools,
            quorum,
            namespace: namespace.to_string(),
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
        })
    }

    pub fn with_retries(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:qlock:{}", self.namespace, key)
    }

    /// Attempts a majority acquisition, retrying with jittered sleeps.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<QuorumGuard> {
        let full_key = self.full_key(key);
        let mut last_acquired = 0;

        for attempt in 0..=self.retry_count {
            let token = Uuid::new_v4().to_string();
            let start = tokio::time::Instant::now();

            let mut acquired = 0;
            for pool in &self.pools {
                if self.set_token(pool, &full_key, &token, ttl).await {
                    acquired += 1;
                }
            }

            let validity = valid_time(ttl, start.elapsed());
            if acquired >= self.quorum
                && let Some(validity) = validity
            {
                debug!(
                    "quorum lock {full_key} acquired: {acquired}/{} votes",
                    self.pools.len()
                );
                return Ok(QuorumGuard {
                    key: full_key,
                    token,
                    validity,
                });
            }

            // Partial acquisition holds instances hostage; undo before
            // the next round.
            self.release_all(&full_key, &token).await;
            last_acquired = acquired;

            if attempt < self.retry_count {
                let jitter = rand::thread_rng().gen_range(0..self.retry_delay.as_millis() as u64);
                sleep(self.retry_delay + Duration::from_millis(jitter)).await;
            }
        }

        Err(LockError::QuorumNotReached {
            acquired: last_acquired,
            required: self.quorum,
        }
        .into())
    }

    /// Releases on every instance, ignoring per-instance failures.
    pub async fn release(&self, guard: QuorumGuard) {
        self.release_all(&guard.key, &guard.token).await;
    }

    async fn set_token(&self, pool: &Pool, key: &str, token: &str, ttl: Duration) -> bool {
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("quorum instance unreachable during acquire: {e}");
                return false;
            }
        };
        let result: deadpool_redis::redis::RedisResult<Option<String>> =
            deadpool_redis::redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await;
        matches!(result, Ok(Some(_)))
    }

    async fn release_all(&self, key: &str, token: &str) {
        for pool in &self.pools {
            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let result: deadpool_redis::redis::RedisResult<i64> = Script::new(RELEASE_SCRIPT)
                .key(key)
                .arg(token)
                .invoke_async(&mut conn)
                .await;
            if let Err(e) = result {
                debug!("quorum release failed on one instance: {e}");
            }
        }
    }
}

/// TTL minus acquisition time and drift allowance; `None` once the
/// window has already closed.
fn valid_time(ttl: Duration, elapsed: Duration) -> Option<Duration> {
    let drift = ttl.mul_f64(CLOCK_DRIFT_FACTOR) + DRIFT_OVERHEAD;
    ttl.checked_sub(elapsed)?.checked_sub(drift).filter(|v| !v.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_time_subtracts_drift() {
        let ttl = Duration::from_secs(10);
        let validity = valid_time(ttl, Duration::from_millis(500)).unwrap();
        // 10s - 0.5s - (10s * 0.01 + 2ms)
        assert_eq!(validity, Duration::from_millis(9398));
    }

    #[test]
    fn test_valid_time_closed_window() {
        let ttl = Duration::from_millis(100);
        assert!(valid_time(ttl, Duration::from_millis(99)).is_none());
        assert!(valid_time(ttl, Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_majority_threshold() {
        assert_eq!(5 / 2 + 1, 3);
        assert_eq!(4 / 2 + 1, 3);
        assert_eq!(1 / 2 + 1, 1);
    }

    #[test]
    fn test_empty_instance_set_rejected() {
        let err = QuorumLock::new(&[], "test").unwrap_err();
        assert!(err.to_string().contains("no lock instances"));
    }
}
