use dashmap::DashMap;
use deadpool_redis::Pool;
use deadpool_redis::redis::{AsyncCommands, Script};
use errors::Result;
use errors::error::LockError;
use log::{debug, warn};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Proof of acquisition, handed back to [`KeyLock::release`]. Carries
/// the deadline value written to the store; release is a no-op when a
/// contender has already superseded it.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    deadline_ms: u64,
}

enum Backend {
    Redis(Pool),
    Local(DashMap<String, u64>),
}

/// Advisory single-key lock. The stored value is an expiry deadline in
/// epoch milliseconds; ownership is implied by value match, there is no
/// owner id. On contention the caller polls with a fixed sleep until
/// the stored deadline elapses, then races to overwrite it with a
/// read-verify-then-write step.
///
/// Falls back to an in-process map when no store is configured, so
/// single-host deployments keep the same call shape.
pub struct KeyLock {
    backend: Backend,
    namespace: String,
    ttl: Duration,
    poll_interval: Duration,
}

impl KeyLock {
    pub fn new(pool: Option<Pool>, namespace: &str) -> Self {
        let backend = match pool {
            Some(pool) => Backend::Redis(pool),
            None => {
                debug!("key lock running on in-process fallback");
                Backend::Local(DashMap::new())
            }
        };
        KeyLock {
            backend,
            namespace: namespace.to_string(),
            ttl: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.namespace, key)
    }

    /// Acquires the lock, polling until `max_wait` runs out.
    pub async fn acquire(&self, key: &str, max_wait: Duration) -> Result<KeyGuard> {
        let full_key = self.full_key(key);
        let start = tokio::time::Instant::now();

        loop {
            let deadline = now_ms() + self.ttl.as_millis() as u64;
            let acquired = match &self.backend {
                Backend::Redis(pool) => self.try_acquire_redis(pool, &full_key, deadline).await?,
                Backend::Local(map) => try_acquire_local(map, &full_key, deadline),
            };

            if let Some(deadline_ms) = acquired {
                return Ok(KeyGuard {
                    key: full_key,
                    deadline_ms,
                });
            }

            if start.elapsed() >= max_wait {
                return Err(LockError::Timeout.into());
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Releases the lock unless a contender has superseded the stored
    /// deadline in the meantime.
    pub async fn release(&self, guard: KeyGuard) -> Result<()> {
        match &self.backend {
            Backend::Redis(pool) => {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| LockError::ConnectionFailed(Box::new(e)))?;
                let deleted: i64 = Script::new(RELEASE_SCRIPT)
                    .key(&guard.key)
                    .arg(guard.deadline_ms.to_string())
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| LockError::OperationFailed(Box::new(e)))?;
                if deleted == 0 {
                    debug!("lock {} already superseded, skipping delete", guard.key);
                }
            }
            Backend::Local(map) => {
                map.remove_if(&guard.key, |_, stored| *stored == guard.deadline_ms);
            }
        }
        Ok(())
    }

    /// One acquisition attempt against the shared store. Returns the
    /// deadline written on success.
    async fn try_acquire_redis(
        &self,
        pool: &Pool,
        key: &str,
        deadline: u64,
    ) -> Result<Option<u64>> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| LockError::ConnectionFailed(Box::new(e)))?;

        let set: bool = conn
            .set_nx(key, deadline.to_string())
            .await
            .map_err(|e| LockError::OperationFailed(Box::new(e)))?;
        if set {
            return Ok(Some(deadline));
        }

        let stored: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| LockError::OperationFailed(Box::new(e)))?;
        let stored_deadline = stored.and_then(|s| s.parse::<u64>().ok());

        match stored_deadline {
            Some(d) if d > now_ms() => Ok(None),
            _ => {
                // Stored deadline elapsed. Race to overwrite; the old
                // value tells us whether another contender beat us to it.
                let fresh = now_ms() + self.ttl.as_millis() as u64;
                let old: Option<String> = conn
                    .getset(key, fresh.to_string())
                    .await
                    .map_err(|e| LockError::OperationFailed(Box::new(e)))?;
                let old_deadline = old.and_then(|s| s.parse::<u64>().ok());
                match old_deadline {
                    Some(d) if d > now_ms() => {
                        warn!("lost takeover race for lock {key}");
                        Ok(None)
                    }
                    _ => Ok(Some(fresh)),
                }
            }
        }
    }
}

fn try_acquire_local(map: &DashMap<String, u64>, key: &str, deadline: u64) -> Option<u64> {
    match map.entry(key.to_string()) {
        dashmap::mapref::entry::Entry::Occupied(mut entry) => {
            if *entry.get() <= now_ms() {
                entry.insert(deadline);
                Some(deadline)
            } else {
                None
            }
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(deadline);
            Some(deadline)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_acquire_and_release() {
        let lock = KeyLock::new(None, "test");
        let guard = lock
            .acquire("pushtask", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(guard.key, "test:lock:pushtask");
        lock.release(guard).await.unwrap();

        // Reacquirable after release.
        let guard = lock
            .acquire("pushtask", Duration::from_millis(100))
            .await
            .unwrap();
        lock.release(guard).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_contention_times_out() {
        let lock = KeyLock::new(None, "test");
        let _held = lock
            .acquire("pushtask", Duration::from_millis(50))
            .await
            .unwrap();

        let err = lock
            .acquire("pushtask", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_local_takeover_after_expiry() {
        let lock = KeyLock::new(None, "test").with_ttl(Duration::from_millis(300));
        let stale = lock
            .acquire("pushtask", Duration::from_millis(50))
            .await
            .unwrap();

        sleep(Duration::from_millis(320)).await;

        // Deadline elapsed, a second caller may take over.
        let guard = lock
            .acquire("pushtask", Duration::from_millis(500))
            .await
            .unwrap();

        // The stale guard's release must not clobber the new holder.
        lock.release(stale).await.unwrap();
        let err = lock
            .acquire("pushtask", Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        lock.release(guard).await.unwrap();
    }

    #[tokio::test]
    async fn test_mutual_exclusion_under_contention() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let lock = Arc::new(KeyLock::new(None, "test"));
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..3 {
            let lock = lock.clone();
            let active = active.clone();
            let overlaps = overlaps.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..4 {
                    let guard = lock
                        .acquire("counter", Duration::from_secs(5))
                        .await
                        .unwrap();
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    lock.release(guard).await.unwrap();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_contend() {
        let lock = KeyLock::new(None, "test");
        let a = lock.acquire("a", Duration::from_millis(50)).await.unwrap();
        let b = lock.acquire("b", Duration::from_millis(50)).await.unwrap();
        lock.release(a).await.unwrap();
        lock.release(b).await.unwrap();
    }
}
