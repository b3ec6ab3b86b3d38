//! arachne: single-package entry point re-exporting the workspace
//! crates of the crawl pipeline.

pub mod prelude;

pub use ::codec;
pub use ::common;
pub use ::dedup;
pub use ::downloader;
pub use ::engine;
pub use ::errors;
pub use ::lock;
pub use ::parser;
pub use ::queue;
pub use ::utils;
