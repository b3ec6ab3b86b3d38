use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Task,
    Queue,
    Lock,
    Dedup,
    Codec,
    Download,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Task => write!(f, "task"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Lock => write!(f, "lock"),
            ErrorKind::Dedup => write!(f, "dedup"),
            ErrorKind::Codec => write!(f, "codec"),
            ErrorKind::Download => write!(f, "download"),
            ErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_task(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Task)
    }

    pub fn is_queue(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Queue)
    }

    pub fn is_lock(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Lock)
    }

    pub fn is_download(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Download)
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Protocol)
    }

    pub fn is_timeout(&self) -> bool {
        if let Some(source) = &self.inner.source {
            source.to_string().to_lowercase().contains("timeout")
        } else {
            false
        }
    }

    pub fn is_connect(&self) -> bool {
        if let Some(source) = &self.inner.source {
            let msg = source.to_string().to_lowercase();
            msg.contains("connect") || msg.contains("connection")
        } else {
            false
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("arachne::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<TaskError> for Error {
    fn from(err: TaskError) -> Self {
        Error::new(ErrorKind::Task, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        Error::new(ErrorKind::Lock, Some(err))
    }
}

impl From<DedupError> for Error {
    fn from(err: DedupError) -> Self {
        Error::new(ErrorKind::Dedup, Some(err))
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::new(ErrorKind::Codec, Some(err))
    }
}

impl From<DownloadError> for Error {
    fn from(err: DownloadError) -> Self {
        Error::new(ErrorKind::Download, Some(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::new(ErrorKind::Protocol, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("queue full")]
    QueueFull,
    #[error("duplicate url: {0}")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("push failed: {0}")]
    PushFailed(#[source] BoxError),
    #[error("pop failed: {0}")]
    PopFailed(#[source] BoxError),
    #[error("ack failed: {0}")]
    AckFailed(#[source] BoxError),
    #[error("operation failed: {0}")]
    OperationFailed(#[source] BoxError),
    #[error("queue closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),
    #[error("operation failed: {0}")]
    OperationFailed(#[source] BoxError),
    #[error("acquire timed out")]
    Timeout,
    #[error("quorum not reached: {acquired}/{required}")]
    QuorumNotReached { acquired: usize, required: usize },
    #[error("no lock instances available")]
    NoInstances,
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),
    #[error("operation failed: {0}")]
    OperationFailed(#[source] BoxError),
    #[error("invalid bit size: {0}")]
    InvalidBitSize(u64),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    EncodeFailed(#[source] BoxError),
    #[error("decode failed: {0}")]
    DecodeFailed(#[source] BoxError),
    #[error("empty frame")]
    EmptyFrame,
    #[error("compression failed: {0}")]
    CompressionFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] BoxError),
    #[error("timeout")]
    Timeout,
    #[error("body too large: {0} bytes")]
    BodyTooLarge(u64),
    #[error("download failed: {0}")]
    DownloadFailed(#[source] BoxError),
    #[error("cache io: {0}")]
    CacheIo(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] BoxError),
    #[error("send failed: {0}")]
    SendFailed(#[source] BoxError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl Error {
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Error::from(TaskError::InvalidUrl(url.into()))
    }

    pub fn queue_full() -> Self {
        Error::from(TaskError::QueueFull)
    }

    pub fn download_failed<E: Into<BoxError>>(source: E) -> Self {
        Error::from(DownloadError::DownloadFailed(source.into()))
    }

    pub fn body_too_large(bytes: u64) -> Self {
        Error::from(DownloadError::BodyTooLarge(bytes))
    }

    pub fn malformed_frame(msg: impl Into<String>) -> Self {
        Error::from(ProtocolError::MalformedFrame(msg.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::from(DownloadError::Timeout),
            std::io::ErrorKind::ConnectionRefused => {
                Error::from(ProtocolError::HandshakeFailed(Box::new(err)))
            }
            _ => Error::new(ErrorKind::Protocol, Some(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(CodecError::DecodeFailed(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::from(DownloadError::Timeout);
        assert!(err.is_download());
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_display() {
        let err = Error::queue_full();
        assert_eq!(err.to_string(), "task error: queue full");
    }

    #[test]
    fn test_error_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timed out");
        let err = Error::from(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_kinds() {
        let err = Error::invalid_url("ftp://x");
        assert!(err.is_task());
        assert!(!err.is_queue());

        let err = Error::malformed_frame("empty decode");
        assert!(err.is_protocol());
    }
}
