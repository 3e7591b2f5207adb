//! The `pipe()` coroutine (§4.4, component E): couples a readable to a
//! writable with an optional byte-count cap, delimiter termination, and
//! `end`-on-finish propagation. Grounded on the teacher's `_action` loop,
//! which drove the same `Bytes`/`Delimiter`/`Flush` expectations through a
//! single state machine; here it is an ordinary `async fn` loop per §9's
//! "coroutine control flow becomes an explicit state machine" guidance.

use std::time::Duration;

use crate::delimiter::Delimiter;
use crate::error::StreamError;
use crate::stream_trait::{ReadableStream, WritableStream};

/// Copies bytes from `from` to `to` until one of:
/// - `length` bytes (if `length > 0`) have been transferred,
/// - a chunk is read whose last byte equals `delimiter` (if set),
/// - `from` stops being readable or `to` stops being writable.
///
/// Returns the total number of bytes transferred. If `end_on_finish` is
/// true (the default callers should use), `to.end()` is invoked once
/// transfer stops — whether it stopped normally or via an error — provided
/// `to` is still writable at that point. The `timeout` applies to each
/// underlying `read`/`write` individually, not to the whole transfer (§4.4).
pub async fn pipe<R, W>(
    from: &R,
    to: &W,
    end_on_finish: bool,
    length: usize,
    delimiter: Delimiter,
    timeout: Duration,
) -> Result<usize, StreamError>
where
    R: ReadableStream,
    W: WritableStream,
{
    let result = transfer(from, to, length, delimiter, timeout).await;

    if end_on_finish && to.is_writable() {
        // Best-effort: a failure here must not shadow the transfer's own
        // error, and a successful transfer still reports its own result.
        let _ = to.end(bytes::Bytes::new(), timeout).await;
    }

    result
}

async fn transfer<R, W>(
    from: &R,
    to: &W,
    length: usize,
    delimiter: Delimiter,
    timeout: Duration,
) -> Result<usize, StreamError>
where
    R: ReadableStream,
    W: WritableStream,
{
    let mut transferred = 0usize;
    let mut remaining = length;

    loop {
        let read_length = if length > 0 { remaining } else { 0 };
        let chunk = from.read(read_length, delimiter, timeout).await?;
        let n = chunk.len();

        let hit_delimiter = match delimiter {
            Delimiter::Byte(byte) => chunk.last().copied() == Some(byte),
            Delimiter::None => false,
        };

        to.write(chunk, timeout).await?;
        transferred += n;

        if !from.is_readable() || !to.is_writable() {
            break;
        }
        if hit_delimiter {
            break;
        }
        if length > 0 {
            remaining -= n;
            if remaining == 0 {
                break;
            }
        }
    }

    Ok(transferred)
}
