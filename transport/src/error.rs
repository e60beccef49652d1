//! Error types reported by transport implementations.

use std::sync::Arc;

use thiserror::Error;

/// Errors a transport session or task can produce.
///
/// `Clone` so a single terminal error can be reported to every observer of
/// a task; the I/O source is shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The transport does not recognize the input as a valid URL.
    #[error("invalid URL")]
    InvalidUrl,
    /// An underlying I/O error occurred while transferring.
    #[error("transport IO error")]
    Io(#[source] Arc<std::io::Error>),
    /// The task was cancelled before it finished.
    #[error("task cancelled")]
    Cancelled,
    /// The transfer did not finish within the configured timeout.
    #[error("request not finished within timeout")]
    RequestTimeout,
    /// The session has been invalidated and no longer accepts tasks.
    #[error("session invalidated")]
    SessionInvalidated,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// A `Result` alias where the `Err` case is a transport [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
