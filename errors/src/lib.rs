pub mod error;

pub use error::{
    BoxError, CodecError, DedupError, DownloadError, Error, ErrorKind, LockError, ProtocolError,
    QueueError, Result, TaskError,
};
