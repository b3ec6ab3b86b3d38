//! Downloader side of the wire protocol: a set of persistent WebSocket
//! connections that pull tasks from the broker, fetch their bodies and
//! forward the results to a parser. Connections rotate after a request
//! cap, send advisory heartbeats to remote peers and reconnect with a
//! fixed delay after any close.

pub mod connection;
pub mod fetcher;
pub mod manager;

pub use connection::CloseCause;
pub use fetcher::{FetchResult, Fetcher, HttpFetcher};
pub use manager::{DownloaderEngine, Router};
