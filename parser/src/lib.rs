//! Parse side of the wire protocol: a WebSocket endpoint that decodes
//! downloader frames, runs extraction, normalizes and filters
//! discovered sub-URLs and re-admits them through a [`TaskSink`].
//! Connections silent past the idle timeout are force-closed; a 1 s
//! liveness timer does the sweeping.

pub mod extract;
mod handler;
pub mod server;

pub use common::sink::TaskSink;
pub use extract::{Extraction, Extractor, NoopExtractor};
pub use server::ParserServer;
