// Core model and hooks
pub use ::common::hooks::{Hooks, NoopHooks};
pub use ::common::model::config::Config;
pub use ::common::model::frame::{BinaryType, Frame};
pub use ::common::model::task::{FieldRule, Task, validate_url};
pub use ::common::sink::TaskSink;

// Errors
pub use ::errors::{Error, ErrorKind, Result};

// Worker wiring
pub use ::engine::{ADMISSION_LOCK_KEY, Admission, Worker, WorkerContext};

pub mod queue {
    pub use ::queue::{Broker, Delivery, KafkaBroker, MemoryBroker, RedisBroker, RoutePolicy};
    pub use ::queue::broker_from_config;
}
pub mod dedup {
    pub use ::dedup::{DedupFilter, MemoryBloom, RedisBloom};
    pub use ::dedup::{optimal_bit_size, optimal_hash_rounds};
}
pub mod lock {
    pub use ::lock::{KeyGuard, KeyLock, QuorumGuard, QuorumLock};
}
pub mod codec {
    pub use ::codec::{CompressAlgorithm, PackMethod, PackageCodec};
}
pub mod downloader {
    pub use ::downloader::{
        CloseCause, DownloaderEngine, FetchResult, Fetcher, HttpFetcher, Router,
    };
}
pub mod parser {
    pub use ::parser::{Extraction, Extractor, NoopExtractor, ParserServer};
}
pub mod utils {
    pub use ::utils::logger;
    pub use ::utils::urlnorm::{domain_allowed, resolve};
}
