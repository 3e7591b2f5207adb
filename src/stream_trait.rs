use std::time::Duration;

use bytes::Bytes;

use crate::delimiter::Delimiter;
use crate::error::StreamError;

/// The read half of the duplex stream contract (§6).
///
/// Implemented by [`MemoryStream`](crate::MemoryStream) and by
/// [`ReadableFd`](crate::ReadableFd). Mirrors the shape of
/// `embedded_io_async::Read` from `embedded-hal` (native `async fn` in
/// trait, one fully-documented primitive, terse defaulted helpers) rather
/// than a hand-dispatched callback trait.
pub trait ReadableStream {
    /// `true` while the stream can still be read from: for
    /// [`MemoryStream`] this is exactly `is_open()`; the FD variant also
    /// requires that EOF hasn't been observed with an empty holdover (§6).
    fn is_readable(&self) -> bool;

    /// Reads up to `length` bytes (`0` = uncapped), stopping early at
    /// `delimiter` if one is given and present in the buffered data.
    /// Suspends if no data is immediately available; rejects with
    /// [`StreamError::Busy`] if a read is already pending, with
    /// [`StreamError::Timeout`] if `timeout` elapses first (`Duration::ZERO`
    /// disables the timeout), and with [`StreamError::Unreadable`] if the
    /// stream is already closed. See §4.1 for the full framing policy.
    async fn read(
        &self,
        length: usize,
        delimiter: Delimiter,
        timeout: Duration,
    ) -> Result<Bytes, StreamError>;

    /// `read(0, Delimiter::None, Duration::ZERO)` — read whatever is
    /// immediately available, or wait indefinitely for some.
    async fn read_all(&self) -> Result<Bytes, StreamError> {
        self.read(0, Delimiter::None, Duration::ZERO).await
    }
}

/// The write half of the duplex stream contract (§6).
pub trait WritableStream {
    /// `true` until `end()`/`close()` has been called (once-false; never
    /// becomes true again, §3).
    fn is_writable(&self) -> bool;

    /// Appends `data`, returning the number of bytes accepted once any
    /// induced backpressure has cleared (§4.2). The returned count is
    /// always `data.len()`: this call either fully queues `data` and waits
    /// out backpressure, or fails outright.
    async fn write(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError>;

    /// Like [`write`](Self::write), then half-closes the stream (§4.2,
    /// §4.3): `is_writable()` becomes `false` immediately; the stream stays
    /// open until the buffer drains.
    async fn end(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError>;
}

/// Shared lifecycle operations implemented by every duplex stream (§6).
pub trait Stream: ReadableStream + WritableStream {
    /// `true` until the stream has fully closed (§3's `open` flag).
    fn is_open(&self) -> bool;

    /// Idempotent. On the first call, transitions to closed and rejects any
    /// outstanding waiters with [`StreamError::Closed`] (§4.3).
    fn close(&self);
}
