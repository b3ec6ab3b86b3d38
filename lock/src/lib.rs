//! Distributed locking primitives.
//!
//! [`KeyLock`] is the advisory single-key lock that serializes queue
//! admission across workers. [`QuorumLock`] is an independent
//! majority-vote mutex over N store instances, exposed as a
//! general-purpose primitive for user code.

pub mod quorum;
pub mod simple;

pub use quorum::{QuorumGuard, QuorumLock};
pub use simple::{KeyGuard, KeyLock};
