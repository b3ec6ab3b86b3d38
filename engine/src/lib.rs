//! Worker wiring: the explicit capability context, the queue admission
//! gate and the combined parser + downloader worker lifecycle.

pub mod admission;
pub mod context;
pub mod worker;

pub use admission::{ADMISSION_LOCK_KEY, Admission};
pub use context::WorkerContext;
pub use worker::Worker;
