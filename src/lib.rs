//! Cooperative, single-threaded async duplex byte streams: a buffer
//! mediating between at-most-one pending reader and a FIFO of
//! backpressure-blocked writers, with delimiter framing, half-close, and
//! timeouts composed on top via `tokio::time::timeout`.
//!
//! [`MemoryStream`] is the in-memory/test engine; with the `fd` feature
//! (on by default), [`ReadableFd`]/[`WritableFd`] wrap the same contract
//! around a non-blocking file descriptor. [`pipe`] couples a
//! [`ReadableStream`] to a [`WritableStream`].
//!
//! None of these types are `Send`: they're built on `Rc<RefCell<_>>`
//! rather than `Arc<Mutex<_>>` because the cooperative scheduling model
//! guarantees no other task runs between a check and its mutation, so a
//! lock would be both unnecessary and, across an await point, wrong.

mod buffer;
mod delimiter;
mod decode;
mod error;
#[cfg(all(feature = "fd", unix))]
mod fd;
mod memory;
mod pipe;
mod stream_trait;
mod waiter;

pub use buffer::ByteBuffer;
pub use decode::Utf8LineReader;
pub use delimiter::Delimiter;
pub use error::StreamError;
#[cfg(all(feature = "fd", unix))]
pub use fd::{ReadableFd, WritableFd};
pub use memory::MemoryStream;
pub use pipe::pipe;
pub use stream_trait::{ReadableStream, Stream, WritableStream};
pub use waiter::{Waiter, WaiterOutcome};
