use std::io;

/// Errors surfaced by [`ReadableStream`](crate::ReadableStream) and
/// [`WritableStream`](crate::WritableStream) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// `read`/`pipe` called on a stream that is closed or was never readable.
    #[error("stream is not readable")]
    Unreadable,

    /// `write`/`end` called on a stream whose writable half is closed.
    #[error("stream is not writable")]
    Unwritable,

    /// The stream closed while an operation was pending on it.
    #[error("stream closed")]
    Closed,

    /// A second read was attempted while one was already pending.
    #[error("a read is already pending on this stream")]
    Busy,

    /// A pending read or write did not complete before its timeout elapsed.
    #[error("operation timed out")]
    Timeout,

    /// A caller-supplied argument was outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The underlying file descriptor returned an I/O error.
    #[error("I/O failure: {0}")]
    Failure(#[from] io::Error),
}

/// `io::Error` isn't `Clone`, so this reconstructs `Failure` from the
/// original's kind and message rather than deriving. Needed by
/// [`MemoryStream`](crate::MemoryStream)'s `fail_all`, which sends the same
/// logical error to every outstanding waiter.
impl Clone for StreamError {
    fn clone(&self) -> Self {
        match self {
            StreamError::Unreadable => StreamError::Unreadable,
            StreamError::Unwritable => StreamError::Unwritable,
            StreamError::Closed => StreamError::Closed,
            StreamError::Busy => StreamError::Busy,
            StreamError::Timeout => StreamError::Timeout,
            StreamError::InvalidArgument(s) => StreamError::InvalidArgument(s),
            StreamError::Failure(e) => StreamError::Failure(io::Error::new(e.kind(), e.to_string())),
        }
    }
}
