//! FD-backed duplex stream halves (§4.5, component D): the same engine as
//! [`crate::memory::MemoryStream`] with the [`ByteBuffer`] replaced by the
//! kernel's socket buffer and readiness coming from the event loop instead
//! of being known synchronously. The raw non-blocking read/write syscalls
//! themselves are out of this crate's specified scope (§1); this module
//! only owns the framing, the holdover buffer, and the write FIFO around
//! them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tokio::sync::{oneshot, Notify};
use tracing::trace;

use crate::buffer::{remove, ByteBuffer};
use crate::delimiter::Delimiter;
use crate::error::StreamError;
use crate::stream_trait::{ReadableStream, WritableStream};

struct RawFdHandle(OwnedFd);

impl AsRawFd for RawFdHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

fn raw_read(fd: &RawFdHandle, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: &RawFdHandle, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

const READ_CHUNK: usize = 64 * 1024;

struct ReadState {
    holdover: ByteBuffer,
    eof: bool,
    pending: bool,
}

/// The read half of a non-blocking file descriptor. Ownership of `fd` is
/// transferred in (§6: "ownership is transferred to the stream object").
#[derive(Clone)]
pub struct ReadableFd {
    fd: Rc<AsyncFd<RawFdHandle>>,
    state: Rc<RefCell<ReadState>>,
}

impl ReadableFd {
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        Ok(ReadableFd {
            fd: Rc::new(AsyncFd::new(RawFdHandle(fd))?),
            state: Rc::new(RefCell::new(ReadState {
                holdover: ByteBuffer::new(),
                eof: false,
                pending: false,
            })),
        })
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.borrow();
        !state.eof || !state.holdover.is_empty()
    }

    /// Tries to satisfy `(length, delimiter)` purely from the holdover
    /// buffer, without a syscall. `None` means "need fresh bytes".
    fn try_frame_holdover(state: &mut ReadState, length: usize, delimiter: Delimiter) -> Option<Bytes> {
        if state.holdover.is_empty() {
            return None;
        }
        if let Delimiter::Byte(byte) = delimiter {
            if state.holdover.search(byte).is_some() {
                return Some(remove(&mut state.holdover, length, delimiter));
            }
            None
        } else if length == 0 {
            // No delimiter and no cap: unlike the memory stream, more bytes
            // may be one syscall away, so we don't hand back a partial
            // holdover here unless eof is already known (handled by the
            // caller's loop).
            None
        } else if state.holdover.len() >= length {
            Some(remove(&mut state.holdover, length, delimiter))
        } else {
            None
        }
    }

    pub async fn read(
        &self,
        length: usize,
        delimiter: Delimiter,
        timeout: Duration,
    ) -> Result<Bytes, StreamError> {
        {
            let mut state = self.state.borrow_mut();
            if state.pending {
                return Err(StreamError::Busy);
            }
            if state.eof && state.holdover.is_empty() {
                return Err(StreamError::Unreadable);
            }
            state.pending = true;
        }
        let _guard = ReadPendingGuard { state: self.state.clone() };

        let body = self.read_loop(length, delimiter);
        if timeout.is_zero() {
            body.await
        } else {
            match tokio::time::timeout(timeout, body).await {
                Ok(result) => result,
                Err(_elapsed) => Err(StreamError::Timeout),
            }
        }
    }

    async fn read_loop(&self, length: usize, delimiter: Delimiter) -> Result<Bytes, StreamError> {
        loop {
            {
                let mut state = self.state.borrow_mut();
                if let Some(data) = Self::try_frame_holdover(&mut state, length, delimiter) {
                    return Ok(data);
                }
                if state.eof {
                    return Ok(state.holdover.drain());
                }
            }

            let mut guard = self.fd.readable().await.map_err(StreamError::Failure)?;
            let mut scratch = [0u8; READ_CHUNK];
            let cap = if length == 0 { READ_CHUNK } else { length.min(READ_CHUNK) };
            let io_result = guard.try_io(|fd| raw_read(fd.get_ref(), &mut scratch[..cap]));
            match io_result {
                Ok(Ok(0)) => {
                    let mut state = self.state.borrow_mut();
                    state.eof = true;
                    trace!("fd reached eof");
                }
                Ok(Ok(n)) => {
                    let mut state = self.state.borrow_mut();
                    state.holdover.push(&scratch[..n]);
                }
                Ok(Err(e)) => return Err(StreamError::Failure(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

struct ReadPendingGuard {
    state: Rc<RefCell<ReadState>>,
}

impl Drop for ReadPendingGuard {
    fn drop(&mut self) {
        self.state.borrow_mut().pending = false;
    }
}

impl ReadableStream for ReadableFd {
    fn is_readable(&self) -> bool {
        self.is_open()
    }

    async fn read(&self, length: usize, delimiter: Delimiter, timeout: Duration) -> Result<Bytes, StreamError> {
        ReadableFd::read(self, length, delimiter, timeout).await
    }
}

struct WriteRequest {
    id: u64,
    data: Bytes,
    written: usize,
    tx: oneshot::Sender<Result<usize, StreamError>>,
}

struct WriteState {
    queue: VecDeque<WriteRequest>,
    writable: bool,
    next_id: u64,
}

/// The write half of a non-blocking file descriptor: a FIFO of
/// `(data, already_written, Waiter)` requests, drained in order as the fd
/// becomes writable (§4.5). Each `write()` call drives the queue's front
/// request to completion (its own, or whichever is ahead of it) and is
/// woken via `front_changed` whenever the front entry changes.
#[derive(Clone)]
pub struct WritableFd {
    fd: Rc<AsyncFd<RawFdHandle>>,
    state: Rc<RefCell<WriteState>>,
    front_changed: Rc<Notify>,
}

impl WritableFd {
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        Ok(WritableFd {
            fd: Rc::new(AsyncFd::new(RawFdHandle(fd))?),
            state: Rc::new(RefCell::new(WriteState {
                queue: VecDeque::new(),
                writable: true,
                next_id: 0,
            })),
            front_changed: Rc::new(Notify::new()),
        })
    }

    pub fn is_writable(&self) -> bool {
        self.state.borrow().writable
    }

    pub async fn write(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError> {
        let (id, rx) = {
            let mut state = self.state.borrow_mut();
            if !state.writable {
                return Err(StreamError::Unwritable);
            }
            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(WriteRequest { id, data, written: 0, tx });
            (id, rx)
        };
        self.await_request(id, rx, timeout).await
    }

    async fn await_request(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<usize, StreamError>>,
        timeout: Duration,
    ) -> Result<usize, StreamError> {
        let wait = async {
            match rx.await {
                Ok(result) => result,
                Err(_recv_error) => Err(StreamError::Closed),
            }
        };
        tokio::pin!(wait);
        let pump = self.pump(id);
        tokio::pin!(pump);

        let raced = async {
            tokio::select! {
                biased;
                result = &mut wait => result,
                result = &mut pump => result,
            }
        };

        if timeout.is_zero() {
            raced.await
        } else {
            match tokio::time::timeout(timeout, raced).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    self.state.borrow_mut().queue.retain(|r| r.id != id);
                    self.front_changed.notify_waiters();
                    Err(StreamError::Timeout)
                }
            }
        }
    }

    /// Drives the queue from the front until the request matching `id` is
    /// resolved (whether or not `id` is itself the front when this starts —
    /// it services whatever is at the front, in order, the same way a
    /// single event-loop callback would).
    async fn pump(&self, id: u64) -> Result<usize, StreamError> {
        loop {
            let front_id = self.state.borrow().queue.front().map(|r| r.id);
            if front_id != Some(id) {
                self.front_changed.notified().await;
                continue;
            }

            let is_empty_request = self.state.borrow().queue.front().map(|r| r.data.is_empty()) == Some(true);
            if is_empty_request {
                let req = {
                    let mut state = self.state.borrow_mut();
                    state.queue.pop_front().expect("front checked above")
                };
                self.front_changed.notify_waiters();
                let is_mine = req.id == id;
                let _ = req.tx.send(Ok(req.written));
                if is_mine {
                    return Ok(req.written);
                }
                continue;
            }

            let mut guard = self.fd.writable().await.map_err(StreamError::Failure)?;
            let io_result = {
                let state = self.state.borrow();
                let req = state.queue.front().expect("front checked above");
                let buf = req.data.slice(req.written..);
                guard.try_io(|fd| raw_write(fd.get_ref(), &buf[..]))
            };
            match io_result {
                Ok(Ok(0)) => {
                    let req = {
                        let mut state = self.state.borrow_mut();
                        state.writable = false;
                        state.queue.pop_front().expect("front checked above")
                    };
                    self.front_changed.notify_waiters();
                    let is_mine = req.id == id;
                    let _ = req.tx.send(Err(StreamError::Failure(io::Error::from(io::ErrorKind::WriteZero))));
                    if is_mine {
                        return Err(StreamError::Failure(io::Error::from(io::ErrorKind::WriteZero)));
                    }
                }
                Ok(Ok(n)) => {
                    let done = {
                        let mut state = self.state.borrow_mut();
                        let req = state.queue.front_mut().expect("front checked above");
                        req.written += n;
                        if req.written >= req.data.len() {
                            Some(state.queue.pop_front().expect("front checked above"))
                        } else {
                            None
                        }
                    };
                    if let Some(done) = done {
                        self.front_changed.notify_waiters();
                        let is_mine = done.id == id;
                        let _ = done.tx.send(Ok(done.written));
                        if is_mine {
                            return Ok(done.written);
                        }
                    }
                }
                Ok(Err(e)) => {
                    let req = {
                        let mut state = self.state.borrow_mut();
                        state.queue.pop_front().expect("front checked above")
                    };
                    self.front_changed.notify_waiters();
                    let is_mine = req.id == id;
                    let _ = req.tx.send(Err(StreamError::Failure(io::Error::from(e.kind()))));
                    if is_mine {
                        return Err(StreamError::Failure(e));
                    }
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl WritableStream for WritableFd {
    fn is_writable(&self) -> bool {
        WritableFd::is_writable(self)
    }

    async fn write(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError> {
        WritableFd::write(self, data, timeout).await
    }

    async fn end(&self, data: Bytes, timeout: Duration) -> Result<usize, StreamError> {
        let n = WritableFd::write(self, data, timeout).await?;
        self.state.borrow_mut().writable = false;
        Ok(n)
    }
}
