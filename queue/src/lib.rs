//! Pluggable FIFO task queue: in-process, redis-list (shardable) or
//! durable kafka backend behind one contract.

pub mod kafka;
pub mod memory;
pub mod redis;

pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;
pub use redis::{RedisBroker, RoutePolicy};

use async_trait::async_trait;
use common::model::config::Config;
use errors::Result;
use log::info;
use std::sync::Arc;

/// One message handed out by [`Broker::pop`]. The tag is present only
/// for backends with explicit acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub tag: Option<String>,
}

/// Task-queue contract: push = left-insert, pop = right-remove, FIFO
/// within one backing list. Backends without explicit ack treat
/// `acknowledge` as a no-op.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueues a payload. Returns a receipt id, or `None` when the
    /// backend rejected the message.
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<Option<String>>;

    /// Dequeues one message. `wait` blocks for a short interval instead
    /// of returning immediately on an empty queue.
    async fn pop(&self, queue: &str, wait: bool) -> Result<Option<Delivery>>;

    /// Current queue length.
    async fn llen(&self, queue: &str) -> Result<u64>;

    /// Drops every message in the queue.
    async fn purge(&self, queue: &str) -> Result<()>;

    /// Confirms a delivery for backends that track it.
    async fn acknowledge(&self, _queue: &str, _tag: &str) -> Result<()> {
        Ok(())
    }

    /// Releases backend resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Selects a broker backend from configuration: redis when configured,
/// else kafka, else the in-process queue (single-worker mode).
pub fn broker_from_config(cfg: &Config) -> Result<Arc<dyn Broker>> {
    if !cfg.queue.redis.is_empty() {
        let policy = RoutePolicy::parse(&cfg.queue.route_policy);
        let broker = RedisBroker::new(&cfg.queue.redis, policy, &cfg.name)?;
        info!(
            "redis broker initialized: {} instance(s), policy {:?}",
            cfg.queue.redis.len(),
            RoutePolicy::parse(&cfg.queue.route_policy)
        );
        Ok(Arc::new(broker))
    } else if let Some(kafka) = &cfg.queue.kafka {
        let broker = KafkaBroker::new(kafka, &cfg.name)?;
        info!("kafka broker initialized");
        Ok(Arc::new(broker))
    } else {
        info!("in-process broker initialized (single worker mode)");
        Ok(Arc::new(MemoryBroker::new()))
    }
}
