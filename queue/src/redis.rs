use crate::{Broker, Delivery};
use async_trait::async_trait;
use common::model::config::RedisConfig;
use errors::Result;
use errors::error::QueueError;
use log::warn;
use uuid::Uuid;

const BLOCK_SECS: f64 = 1.0;

/// Instance selection across a sharded redis queue. Every operation on
/// one queue name lands on the same instance, so FIFO order holds per
/// backing list (and only there).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePolicy {
    /// All queues on one fixed instance.
    Fixed(usize),
    /// Instance chosen by crc32 of the queue name.
    HashKey,
}

impl RoutePolicy {
    pub fn parse(raw: &str) -> RoutePolicy {
        match raw.to_lowercase().as_str() {
            "hash" => RoutePolicy::HashKey,
            other => match other.parse::<usize>() {
                Ok(index) => RoutePolicy::Fixed(index),
                Err(_) => {
                    warn!("unknown route policy '{raw}', falling back to hash");
                    RoutePolicy::HashKey
                }
            },
        }
    }
}

/// Shared-store queue over redis lists: LPUSH on admit, RPOP (BRPOP when
/// waiting) on consume. Supports several independent instances selected
/// by the routing policy.
pub struct RedisBroker {
    pools: Vec<deadpool_redis::Pool>,
    policy: RoutePolicy,
    namespace: String,
}

impl RedisBroker {
    pub fn new(configs: &[RedisConfig], policy: RoutePolicy, namespace: &str) -> Result<Self> {
        if configs.is_empty() {
            return Err(QueueError::ConnectionFailed.into());
        }
        let mut pools = Vec::with_capacity(configs.len());
        for cfg in configs {
            let pool = utils::connector::create_redis_pool(
                &cfg.redis_host,
                cfg.redis_port,
                cfg.redis_db,
                &cfg.redis_username,
                &cfg.redis_password,
                cfg.pool_size,
            )
            .ok_or(QueueError::ConnectionFailed)?;
            pools.push(pool);
        }
        Ok(RedisBroker {
            pools,
            policy,
            namespace: namespace.to_string(),
        })
    }

    fn pool_for(&self, queue: &str) -> &deadpool_redis::Pool {
        let index = match self.policy {
            RoutePolicy::Fixed(index) => index % self.pools.len(),
            RoutePolicy::HashKey => crc32fast::hash(queue.as_bytes()) as usize % self.pools.len(),
        };
        &self.pools[index]
    }

    fn key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.namespace, queue)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<Option<String>> {
        let mut conn = self
            .pool_for(queue)
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let _: u64 = redis::cmd("LPUSH")
            .arg(self.key(queue))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        Ok(Some(Uuid::new_v4().to_string()))
    }

    async fn pop(&self, queue: &str, wait: bool) -> Result<Option<Delivery>> {
        let mut conn = self
            .pool_for(queue)
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let payload: Option<Vec<u8>> = if wait {
            // BRPOP returns (key, value) or nil after the block interval.
            let reply: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
                .arg(self.key(queue))
                .arg(BLOCK_SECS)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::PopFailed(Box::new(e)))?;
            reply.map(|(_, value)| value)
        } else {
            redis::cmd("RPOP")
                .arg(self.key(queue))
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::PopFailed(Box::new(e)))?
        };

        Ok(payload.map(|payload| Delivery { payload, tag: None }))
    }

    async fn llen(&self, queue: &str) -> Result<u64> {
        let mut conn = self
            .pool_for(queue)
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let len: u64 = redis::cmd("LLEN")
            .arg(self.key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        Ok(len)
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        let mut conn = self
            .pool_for(queue)
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let _: u64 = redis::cmd("DEL")
            .arg(self.key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::OperationFailed(Box::new(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_policy_parse() {
        assert_eq!(RoutePolicy::parse("hash"), RoutePolicy::HashKey);
        assert_eq!(RoutePolicy::parse("0"), RoutePolicy::Fixed(0));
        assert_eq!(RoutePolicy::parse("2"), RoutePolicy::Fixed(2));
        assert_eq!(RoutePolicy::parse("bogus"), RoutePolicy::HashKey);
    }

    #[test]
    fn test_routing_is_stable() {
        let cfgs: Vec<RedisConfig> = (0..3)
            .map(|i| RedisConfig {
                redis_host: "localhost".to_string(),
                redis_port: 6379 + i,
                redis_db: 0,
                redis_username: None,
                redis_password: None,
                pool_size: None,
            })
            .collect();
        let broker = RedisBroker::new(&cfgs, RoutePolicy::HashKey, "ns").unwrap();
        // The same queue name must always route to the same instance.
        let first = broker.pool_for("task") as *const _;
        for _ in 0..10 {
            assert_eq!(broker.pool_for("task") as *const _, first);
        }
    }

    #[test]
    fn test_namespaced_key() {
        let cfg = RedisConfig {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_username: None,
            redis_password: None,
            pool_size: None,
        };
        let broker = RedisBroker::new(&[cfg], RoutePolicy::Fixed(0), "prod").unwrap();
        assert_eq!(broker.key("task"), "prod:queue:task");
    }
}
