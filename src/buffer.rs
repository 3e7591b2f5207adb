use bytes::{Bytes, BytesMut};

use crate::delimiter::Delimiter;

/// Append-at-tail, consume-at-head byte storage.
///
/// Plays the role the teacher's `netbuf::Buf` plays in `stream.rs`
/// (`self.inbuf.len()`, `find_substr`, contiguous reads before a `shift`),
/// rebuilt on `bytes::BytesMut` so that [`shift`](ByteBuffer::shift) and
/// [`drain`](ByteBuffer::drain) are O(1) moves rather than copies.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut inner = BytesMut::with_capacity(data.len());
        inner.extend_from_slice(&data);
        ByteBuffer { inner }
    }

    /// Appends `data` to the tail of the buffer.
    pub fn push(&mut self, data: impl AsRef<[u8]>) {
        self.inner.extend_from_slice(data.as_ref());
    }

    /// Removes and returns the first `n` bytes. `n` must not exceed [`len`](Self::len).
    pub fn shift(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.inner.len());
        self.inner.split_to(n).freeze()
    }

    /// Removes and returns the entire buffer.
    pub fn drain(&mut self) -> Bytes {
        let n = self.inner.len();
        self.shift(n)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// First index of `byte`, or `None` if it is not buffered.
    pub fn search(&self, byte: u8) -> Option<usize> {
        self.inner.iter().position(|&b| b == byte)
    }

    /// Indexed read of one byte (§3's "indexed read of one byte"), without
    /// consuming it. `None` if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.inner.get(index).copied()
    }
}

/// Implements the `remove(length, delimiter)` framing policy shared by
/// [`MemoryStream`](crate::MemoryStream) and the FD-backed readers (§4.1,
/// §4.5): the decision of how many bytes a single `read()` call is allowed
/// to take off the front of the buffer.
///
/// `length == 0` means "no length cap" (the read is bounded only by the
/// delimiter, or takes everything buffered if there is no delimiter).
pub fn remove(buffer: &mut ByteBuffer, length: usize, delimiter: Delimiter) -> Bytes {
    if let Delimiter::Byte(byte) = delimiter {
        if let Some(p) = buffer.search(byte) {
            return if length == 0 || p < length {
                buffer.shift(p + 1)
            } else {
                buffer.shift(length)
            };
        }
    }
    if length == 0 {
        buffer.drain()
    } else {
        buffer.shift(length.min(buffer.len()))
    }
}
