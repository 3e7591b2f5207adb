use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::buffer::{remove, ByteBuffer};
use crate::delimiter::Delimiter;
use crate::error::StreamError;
use crate::stream_trait::{ReadableStream, Stream, WritableStream};
use crate::waiter::{Waiter, WaiterOutcome};

type ReadResult = Result<Bytes, StreamError>;
type WriteResult = Result<(), StreamError>;

struct ReadWaiter {
    length: usize,
    delimiter: Delimiter,
    tx: oneshot::Sender<ReadResult>,
}

struct WriteEntry {
    id: u64,
    tx: oneshot::Sender<WriteResult>,
}

/// Maps a [`Waiter`]'s outcome onto the stream error a suspended read
/// reports: a dropped sender (slot cleared without resolving, e.g. by
/// `fail_all`) already carries its own `StreamError` through the channel in
/// the happy path, so this only covers the two ways `with_timeout` itself
/// can fail to deliver one.
fn waiter_outcome_to_error(outcome: WaiterOutcome) -> StreamError {
    match outcome {
        WaiterOutcome::Timeout => StreamError::Timeout,
        WaiterOutcome::Cancelled => StreamError::Closed,
    }
}

struct Inner {
    buffer: ByteBuffer,
    open: bool,
    writable: bool,
    hwm: usize,
    read_waiter: Option<ReadWaiter>,
    write_queue: VecDeque<WriteEntry>,
    next_write_id: u64,
}

impl Inner {
    /// §4.1: after a read drains the buffer past a prior half-close, the
    /// stream finishes closing.
    fn close_if_drained(&mut self) {
        if !self.writable && self.buffer.is_empty() {
            self.open = false;
        }
    }

    /// §4.1/§4.2: wake every queued writer once the buffer is back at or
    /// below the high-water mark. All of them resolve together, in FIFO
    /// order, because each was only queued for having crossed the mark at
    /// some point in the past, not for the buffer's current length.
    fn release_writers_if_drained(&mut self) {
        if self.hwm == 0 || self.buffer.len() <= self.hwm {
            for entry in self.write_queue.drain(..) {
                let _ = entry.tx.send(Ok(()));
            }
        }
    }

    /// Rejects every outstanding waiter with `err` and marks the stream
    /// closed. Used by `close()` (§4.3) and by a fatal writer timeout
    /// (§4.2 point 5, §4.3's "timeout on writer (queued)" row).
    fn fail_all(&mut self, err: StreamError) {
        self.open = false;
        self.writable = false;
        if let Some(rw) = self.read_waiter.take() {
            let _ = rw.tx.send(Err(err.clone()));
        }
        for entry in self.write_queue.drain(..) {
            let _ = entry.tx.send(Err(err.clone()));
        }
    }
}

/// The duplex in-memory stream engine (§3/C, §4.1-4.3): a [`ByteBuffer`]
/// mediating between at-most-one pending reader and a FIFO of writers
/// blocked by `hwm`.
///
/// Single-threaded cooperative model (§5): `MemoryStream` is a cheap
/// `Rc`-backed handle, not `Send`/`Sync` — cloning it shares the same
/// underlying buffer and waiter state, the way multiple handles to the same
/// `rotor` `Stream` would share one `StreamImpl`.
#[derive(Clone)]
pub struct MemoryStream {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryStream {
    /// `hwm <= 0` disables backpressure entirely (negative values are
    /// clamped to zero, matching the source library).
    pub fn new(hwm: i64, initial_data: impl Into<Bytes>) -> Self {
        let hwm = hwm.max(0) as usize;
        let buffer = ByteBuffer::with_initial_data(initial_data.into());
        MemoryStream {
            inner: Rc::new(RefCell::new(Inner {
                buffer,
                open: true,
                writable: true,
                hwm,
                read_waiter: None,
                write_queue: VecDeque::new(),
                next_write_id: 0,
            })),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    pub fn is_readable(&self) -> bool {
        self.is_open()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.borrow().writable
    }

    /// Idempotent (§4.3, §7): the first call rejects every outstanding
    /// waiter with [`StreamError::Closed`]; later calls are no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.open && inner.read_waiter.is_none() && inner.write_queue.is_empty() {
            return;
        }
        trace!("closing memory stream, rejecting outstanding waiters");
        inner.fail_all(StreamError::Closed);
    }

    pub async fn read(
        &self,
        length: usize,
        delimiter: Delimiter,
        timeout: Duration,
    ) -> Result<Bytes, StreamError> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.read_waiter.is_some() {
                return Err(StreamError::Busy);
            }
            if !inner.buffer.is_empty() {
                let data = remove(&mut inner.buffer, length, delimiter);
                inner.close_if_drained();
                inner.release_writers_if_drained();
                return Ok(data);
            }
            if !inner.open {
                return Err(StreamError::Unreadable);
            }
            let (tx, waiter) = Waiter::new();
            inner.read_waiter = Some(ReadWaiter { length, delimiter, tx });
            waiter
        };

        let _guard = ReadSlotGuard { inner: self.inner.clone() };
        match waiter.with_timeout(timeout).await {
            Ok(result) => result,
            Err(outcome) => Err(waiter_outcome_to_error(outcome)),
        }
    }

    async fn write_impl(&self, data: Bytes, end: bool, timeout: Duration) -> Result<usize, StreamError> {
        let original_len = data.len();
        let queued = {
            let mut inner = self.inner.borrow_mut();
            if !inner.writable {
                return Err(StreamError::Unwritable);
            }
            if !data.is_empty() {
                inner.buffer.push(&data);
            }
            if inner.read_waiter.is_some() && !inner.buffer.is_empty() {
                let rw = inner.read_waiter.take().unwrap();
                let result = remove(&mut inner.buffer, rw.length, rw.delimiter);
                let _ = rw.tx.send(Ok(result));
            }
            if end {
                inner.writable = false;
                if inner.buffer.is_empty() {
                    inner.open = false;
                    if let Some(rw) = inner.read_waiter.take() {
                        let _ = rw.tx.send(Err(StreamError::Closed));
                    }
                }
            }
            if inner.hwm > 0 && inner.buffer.len() > inner.hwm {
                let id = inner.next_write_id;
                inner.next_write_id += 1;
                let (tx, waiter) = Waiter::new();
                inner.write_queue.push_back(WriteEntry { id, tx });
                debug!(hwm = inner.hwm, buffered = inner.buffer.len(), "write suspended on backpressure");
                Some((id, waiter))
            } else {
                None
            }
        };

        let Some((id, waiter)) = queued else {
            return Ok(original_len);
        };

        let _guard = WriteSlotGuard { inner: self.inner.clone(), id };
        match waiter.with_timeout(timeout).await {
            Ok(Ok(())) => Ok(original_len),
            Ok(Err(e)) => Err(e),
            Err(WaiterOutcome::Timeout) => {
                // §4.2 point 5: a backpressure timeout is fatal to the
                // stream, not just to this write.
                debug!("write timed out under backpressure, freeing stream");
                self.inner.borrow_mut().fail_all(StreamError::Timeout);
                Err(StreamError::Timeout)
            }
            Err(WaiterOutcome::Cancelled) => Err(StreamError::Closed),
        }
    }

    pub async fn write(&self, data: impl Into<Bytes>, timeout: Duration) -> Result<usize, StreamError> {
        self.write_impl(data.into(), false, timeout).await
    }

    pub async fn end(&self, data: impl Into<Bytes>, timeout: Duration) -> Result<usize, StreamError> {
        self.write_impl(data.into(), true, timeout).await
    }
}

/// Clears the read slot on drop regardless of how the read future stopped:
/// normal resolution already takes the slot (so this is a no-op then), but
/// cancellation (the future dropped mid-await, e.g. raced out of a
/// `select!`, or dropped internally by `tokio::time::timeout` on elapse)
/// leaves the slot installed with a now-useless `Sender` unless we clear it
/// here. This is what keeps "busy exclusion" correct and makes cancellation
/// clean (§5, §8 property 6): a fresh `read()` right after is accepted.
struct ReadSlotGuard {
    inner: Rc<RefCell<Inner>>,
}

impl Drop for ReadSlotGuard {
    fn drop(&mut self) {
        self.inner.borrow_mut().read_waiter = None;
    }
}

/// Same idea as [`ReadSlotGuard`] for a single entry in the writer FIFO:
/// dequeues this entry if it is still sitting in the queue when dropped.
struct WriteSlotGuard {
    inner: Rc<RefCell<Inner>>,
    id: u64,
}

impl Drop for WriteSlotGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.write_queue.retain(|entry| entry.id != self.id);
    }
}

impl ReadableStream for MemoryStream {
    fn is_readable(&self) -> bool {
        MemoryStream::is_readable(self)
    }

    async fn read(
        &self,
        length: usize,
        delimiter: Delimiter,
        timeout: Duration,
    ) -> Result<Bytes, StreamError> {
        MemoryStream::read(self, length, delimiter, timeout).await
    }
}

impl WritableStream for MemoryStream {
    fn is_writable(&self) -> bool {
        MemoryStream::is_writable(self)
    }

    async fn write(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError> {
        MemoryStream::write(self, data, timeout).await
    }

    async fn end(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError> {
        MemoryStream::end(self, data, timeout).await
    }
}

impl Stream for MemoryStream {
    fn is_open(&self) -> bool {
        MemoryStream::is_open(self)
    }

    fn close(&self) {
        MemoryStream::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    fn s(hwm: i64) -> MemoryStream {
        MemoryStream::new(hwm, Bytes::new())
    }

    #[tokio::test]
    async fn write_then_unbounded_read_returns_everything() {
        let stream = s(0);
        stream.write(&b"abcdefghijklmnopqrstuvwxyz"[..], Duration::ZERO).await.unwrap();
        let data = stream.read(0, Delimiter::None, Duration::ZERO).await.unwrap();
        assert_eq!(&data[..], b"abcdefghijklmnopqrstuvwxyz");
    }

    #[tokio::test]
    async fn bounded_reads_split_the_buffer() {
        let stream = s(0);
        stream.write(&b"abcdefghijklmnopqrstuvwxyz"[..], Duration::ZERO).await.unwrap();
        let first = stream.read(13, Delimiter::None, Duration::ZERO).await.unwrap();
        assert_eq!(&first[..], b"abcdefghijklm");
        let second = stream.read(13, Delimiter::None, Duration::ZERO).await.unwrap();
        assert_eq!(&second[..], b"nopqrstuvwxyz");
    }

    #[tokio::test]
    async fn delimiter_read_then_drain_rest() {
        let stream = s(0);
        stream.write(&b"abcdefghijklmnopqrstuvwxyz"[..], Duration::ZERO).await.unwrap();
        let first = stream.read(0, Delimiter::Byte(b'f'), Duration::ZERO).await.unwrap();
        assert_eq!(&first[..], b"abcdef");
        let rest = stream.read(0, Delimiter::None, Duration::ZERO).await.unwrap();
        assert_eq!(&rest[..], b"ghijklmnopqrstuvwxyz");
    }

    // `MemoryStream` is `Rc`-backed (single-threaded cooperative model, §5),
    // so exercising two operations "concurrently" needs a `LocalSet` rather
    // than `tokio::spawn`, which requires `Send`.
    #[tokio::test]
    async fn pending_read_rejects_with_closed_on_close() {
        let stream = s(0);
        LocalSet::new()
            .run_until(async {
                let reader = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.read(0, Delimiter::None, Duration::ZERO).await }
                });
                tokio::task::yield_now().await;
                stream.close();
                let result = reader.await.unwrap();
                assert!(matches!(result, Err(StreamError::Closed)));
            })
            .await;
    }

    #[tokio::test]
    async fn second_concurrent_read_is_busy() {
        let stream = s(0);
        LocalSet::new()
            .run_until(async {
                let _first = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.read(0, Delimiter::None, Duration::from_secs(5)).await }
                });
                tokio::task::yield_now().await;
                let result = stream.read(0, Delimiter::None, Duration::ZERO).await;
                assert!(matches!(result, Err(StreamError::Busy)));
            })
            .await;
    }

    #[tokio::test]
    async fn end_with_data_resolves_pending_read_and_closes() {
        let stream = s(0);
        LocalSet::new()
            .run_until(async {
                let reader = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.read(0, Delimiter::None, Duration::from_secs(5)).await }
                });
                tokio::task::yield_now().await;
                let n = stream.end(&b"abcdefghijklmnopqrstuvwxyz"[..], Duration::ZERO).await.unwrap();
                assert_eq!(n, 26);
                let data = reader.await.unwrap().unwrap();
                assert_eq!(&data[..], b"abcdefghijklmnopqrstuvwxyz");
                assert!(!stream.is_writable());
                assert!(!stream.is_open());
            })
            .await;
    }

    #[tokio::test]
    async fn end_empty_with_pending_reader_rejects_closed() {
        let stream = s(0);
        LocalSet::new()
            .run_until(async {
                let reader = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.read(0, Delimiter::None, Duration::from_secs(5)).await }
                });
                tokio::task::yield_now().await;
                let n = stream.end(Bytes::new(), Duration::ZERO).await.unwrap();
                assert_eq!(n, 0);
                let result = reader.await.unwrap();
                assert!(matches!(result, Err(StreamError::Closed)));
            })
            .await;
    }

    #[tokio::test]
    async fn read_times_out_on_empty_stream() {
        let stream = s(0);
        let result = stream.read(0, Delimiter::None, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(StreamError::Timeout)));
    }

    #[tokio::test]
    async fn cancelled_read_frees_the_slot_for_a_fresh_read() {
        let stream = s(0);
        LocalSet::new()
            .run_until(async {
                let handle = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.read(0, Delimiter::None, Duration::from_secs(30)).await }
                });
                tokio::task::yield_now().await;
                handle.abort(); // cancels the pending read mid-await
                let _ = handle.await;
            })
            .await;
        stream.write(&b"ok"[..], Duration::ZERO).await.unwrap();
        let data = stream.read(0, Delimiter::None, Duration::ZERO).await.unwrap();
        assert_eq!(&data[..], b"ok");
    }

    #[tokio::test]
    async fn backpressure_blocks_write_past_hwm() {
        let stream = s(16);
        stream.write(&b"0123456789abcdef"[..], Duration::ZERO).await.unwrap(); // exactly at hwm, no block
        LocalSet::new()
            .run_until(async {
                let writer = tokio::task::spawn_local({
                    let stream = stream.clone();
                    async move { stream.write(&b"x"[..], Duration::from_secs(5)).await }
                });
                tokio::task::yield_now().await;
                // Draining one byte should release the queued writer.
                let _ = stream.read(1, Delimiter::None, Duration::ZERO).await.unwrap();
                let n = writer.await.unwrap().unwrap();
                assert_eq!(n, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn writer_timeout_is_fatal_and_frees_other_waiters() {
        let stream = s(1);
        stream.write(&b"ab"[..], Duration::ZERO).await.unwrap(); // over hwm=1, but first write never blocks on itself
        let result = stream.write(&b"c"[..], Duration::from_millis(20)).await;
        assert!(matches!(result, Err(StreamError::Timeout)));
        assert!(!stream.is_open());
    }
}
