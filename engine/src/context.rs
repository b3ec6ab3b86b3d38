use common::hooks::{Hooks, NoopHooks};
use common::model::config::Config;
use dedup::{DedupFilter, MemoryBloom, RedisBloom};
use downloader::fetcher::{Fetcher, HttpFetcher};
use errors::Result;
use lock::KeyLock;
use log::info;
use queue::Broker;
use std::sync::Arc;
use utils::connector::create_redis_pool;

/// Explicit capability container owned by one worker.
///
/// Every handle is resolved once at construction; nothing is looked up
/// through globals afterwards. The handles live exactly as long as the
/// worker that owns them.
pub struct WorkerContext {
    pub config: Config,
    pub broker: Arc<dyn Broker>,
    pub lock: KeyLock,
    pub dedup: Arc<dyn DedupFilter>,
    pub fetcher: Arc<dyn Fetcher>,
    pub hooks: Arc<dyn Hooks>,
}

impl WorkerContext {
    /// Resolves every capability from configuration. Anything that
    /// cannot be wired here is an infrastructure failure the caller
    /// treats as fatal.
    pub fn from_config(config: Config) -> Result<Self> {
        let broker = queue::broker_from_config(&config)?;

        let dedup: Arc<dyn DedupFilter> = if config.dedup.redis.is_some() {
            Arc::new(RedisBloom::from_config(&config.dedup, &config.name)?)
        } else {
            match (config.dedup.bit_size, config.dedup.hash_rounds) {
                (Some(m), Some(k)) => Arc::new(MemoryBloom::new(m, k)?),
                _ => Arc::new(MemoryBloom::with_capacity(
                    config.dedup.expected_items.unwrap_or(1_000_000),
                    config.dedup.fp_rate.unwrap_or(0.01),
                )?),
            }
        };

        let lock_pool = config.lock.redis.as_ref().and_then(|r| {
            create_redis_pool(
                &r.redis_host,
                r.redis_port,
                r.redis_db,
                &r.redis_username,
                &r.redis_password,
                r.pool_size,
            )
        });
        let lock = KeyLock::new(lock_pool, &config.name);

        let fetcher = Arc::new(HttpFetcher::new(&config.download)?);

        info!("worker context wired for instance '{}'", config.name);
        Ok(WorkerContext {
            config,
            broker,
            lock,
            dedup,
            fetcher,
            hooks: Arc::new(NoopHooks),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_dedup(mut self, dedup: Arc<dyn DedupFilter>) -> Self {
        self.dedup = dedup;
        self
    }

    /// The instance name doubles as the task queue name and the
    /// shared-store key namespace.
    pub fn queue_name(&self) -> &str {
        &self.config.name
    }
}
