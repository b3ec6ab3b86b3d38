use serde::{Deserialize, Serialize};
use std::fmt;

/// Redis instance configuration.
#[derive(Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis server hostname
    pub redis_host: String,
    /// Redis server port
    pub redis_port: u16,
    /// Redis database index
    #[serde(default)]
    pub redis_db: u16,
    /// Optional Redis username
    #[serde(default)]
    pub redis_username: Option<String>,
    /// Optional Redis password
    #[serde(default)]
    pub redis_password: Option<String>,
    /// Connection pool size
    #[serde(default)]
    pub pool_size: Option<usize>,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_username", &self.redis_username)
            .field(
                "redis_password",
                &self.redis_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Kafka configuration for the durable broker backend.
#[derive(Serialize, Deserialize, Clone)]
pub struct KafkaConfig {
    /// Comma-separated list of brokers
    pub brokers: String,
    /// SASL username
    #[serde(default)]
    pub username: Option<String>,
    /// SASL password
    #[serde(default)]
    pub password: Option<String>,
    /// Enable TLS
    #[serde(default)]
    pub tls: Option<bool>,
}

impl fmt::Debug for KafkaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConfig")
            .field("brokers", &self.brokers)
            .field("username", &self.username)
            .field(
                "password",
                &self.password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("tls", &self.tls)
            .finish()
    }
}

fn default_route_policy() -> String {
    "hash".to_string()
}

/// Task queue configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueueConfig {
    /// Redis instances backing the queue; more than one enables sharding
    #[serde(default)]
    pub redis: Vec<RedisConfig>,
    /// Routing policy across redis instances: "hash" or a fixed index
    #[serde(default = "default_route_policy")]
    pub route_policy: String,
    /// Kafka configuration for the durable backend
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    /// Maximum queue length enforced at admission (0 disables the check)
    #[serde(default)]
    pub max_queue_length: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            redis: Vec::new(),
            route_policy: default_route_policy(),
            kafka: None,
            max_queue_length: 0,
        }
    }
}

fn default_max_connections() -> usize {
    1
}

fn default_crawl_interval_ms() -> u64 {
    1000
}

fn default_allow_domains() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_request() -> u64 {
    10000
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

/// Crawl behavior configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CrawlConfig {
    /// Number of cooperating worker processes; >1 serializes admission
    #[serde(default = "default_max_connections")]
    pub worker_count: usize,
    /// Maximum link-hop depth; 0 disables the depth limit
    #[serde(default)]
    pub max_depth: u32,
    /// Persistent connections per downloader (hard ceiling 1000)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Delay between task pulls on one connection, in milliseconds
    #[serde(default = "default_crawl_interval_ms")]
    pub crawl_interval_ms: u64,
    /// Domain allow-list for discovered sub-URLs; "*" disables filtering
    #[serde(default = "default_allow_domains")]
    pub allow_domains: Vec<String>,
    /// Requests served by one connection before planned rotation
    #[serde(default = "default_max_request")]
    pub max_request: u64,
    /// Fixed reconnect delay after any connection close
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            worker_count: 1,
            max_depth: 0,
            max_connections: 1,
            crawl_interval_ms: default_crawl_interval_ms(),
            allow_domains: default_allow_domains(),
            max_request: default_max_request(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_transfer_timeout_secs() -> u64 {
    30
}

/// Download configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DownloadConfig {
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Transfer timeout in seconds
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// Reject downloads whose Content-Length exceeds this (0 disables)
    #[serde(default)]
    pub max_content_length: u64,
    /// Enable the on-disk download cache
    #[serde(default)]
    pub cache_enable: bool,
    /// Directory for the download cache
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            connect_timeout_secs: default_connect_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            max_content_length: 0,
            cache_enable: false,
            cache_dir: None,
        }
    }
}

fn default_pack_method() -> String {
    "msgpack".to_string()
}

/// Package codec configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CodecConfig {
    /// Frame encoding: "json", "msgpack" or "serialize"
    #[serde(default = "default_pack_method")]
    pub method: String,
    /// Enable frame compression
    #[serde(default)]
    pub compress: bool,
    /// Compression algorithm: "gzip" or "deflate"
    #[serde(default)]
    pub compress_algorithm: Option<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            method: default_pack_method(),
            compress: false,
            compress_algorithm: None,
        }
    }
}

/// Dedup filter configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DedupConfig {
    /// Redis instance backing the shared bitmap; absent means local filter
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Bit-array size; power of two for the local filter
    #[serde(default)]
    pub bit_size: Option<u64>,
    /// Hash rounds
    #[serde(default)]
    pub hash_rounds: Option<u32>,
    /// Expected insertion count, used to derive (m, k) with `fp_rate`
    #[serde(default)]
    pub expected_items: Option<u64>,
    /// Target false-positive rate
    #[serde(default)]
    pub fp_rate: Option<f64>,
}

fn default_parser_bind() -> String {
    "127.0.0.1:7621".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

/// Parser endpoint configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParserConfig {
    /// Listen address for the parser server
    #[serde(default = "default_parser_bind")]
    pub bind: String,
    /// Parser endpoints a downloader connects to
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Seconds of silence before the parser evicts a connection
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            bind: default_parser_bind(),
            endpoints: Vec::new(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Lock manager configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LockConfig {
    /// Redis instance for the simple key lock; absent means local fallback
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Independent instances for the quorum lock
    #[serde(default)]
    pub quorum: Vec<RedisConfig>,
}

/// Main configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Instance name, used as the shared-store key namespace
    pub name: String,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "arachne".to_string(),
            queue: QueueConfig::default(),
            crawl: CrawlConfig::default(),
            download: DownloadConfig::default(),
            codec: CodecConfig::default(),
            dedup: DedupConfig::default(),
            parser: ParserConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, String> {
        let config_str = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let config: Config = toml::from_str(&config_str).map_err(|e| e.to_string())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            name = "prod_crawler"

            [queue]
            max_queue_length = 50000
            route_policy = "hash"

            [[queue.redis]]
            redis_host = "10.0.0.5"
            redis_port = 6379
            redis_db = 2
            redis_password = "secret"

            [crawl]
            worker_count = 4
            max_depth = 5
            max_connections = 2
            crawl_interval_ms = 1000
            allow_domains = ["example.com"]

            [download]
            connect_timeout_secs = 5
            transfer_timeout_secs = 60
            max_content_length = 10485760

            [codec]
            method = "msgpack"
            compress = true
            compress_algorithm = "gzip"

            [parser]
            bind = "0.0.0.0:7621"
            endpoints = ["ws://10.0.0.9:7621"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "prod_crawler");
        assert_eq!(config.queue.max_queue_length, 50000);
        assert_eq!(config.queue.redis.len(), 1);
        assert_eq!(config.crawl.worker_count, 4);
        assert_eq!(config.crawl.max_depth, 5);
        assert_eq!(config.codec.compress_algorithm.as_deref(), Some("gzip"));
        assert_eq!(config.parser.idle_timeout_secs, 300);
    }

    #[test]
    fn test_config_minimal() {
        let config: Config = toml::from_str("name = \"dev\"").unwrap();
        assert_eq!(config.crawl.max_connections, 1);
        assert_eq!(config.crawl.crawl_interval_ms, 1000);
        assert_eq!(config.crawl.allow_domains, vec!["*".to_string()]);
        assert_eq!(config.codec.method, "msgpack");
        assert!(config.queue.redis.is_empty());
    }

    #[test]
    fn test_redis_config_debug_redacts_password() {
        let cfg = RedisConfig {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_username: None,
            redis_password: Some("hunter2".to_string()),
            pool_size: None,
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
