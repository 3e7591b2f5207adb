//! A small text-decoding convenience built on top of [`ReadableStream`]
//! (§1 calls this kind of thing "peripheral", SPEC_FULL §12 supplements it
//! in). Grounded on the line-reading shape of
//! `other_examples/8b88e3ef_SeanGeb-enchanted-beans__src-line_reader.rs`
//! (read-then-scan-then-split loop), adapted to ride on our own delimiter
//! framing instead of re-scanning a private buffer.

use std::time::Duration;

use crate::delimiter::Delimiter;
use crate::error::StreamError;
use crate::stream_trait::ReadableStream;

/// Reads `\n`-terminated lines out of a [`ReadableStream`], decoding each
/// line as UTF-8. Strict mode rejects invalid UTF-8 with
/// [`StreamError::InvalidArgument`]; lossy mode substitutes the replacement
/// character instead (`String::from_utf8_lossy`).
pub struct Utf8LineReader<'a, R: ReadableStream> {
    stream: &'a R,
    lossy: bool,
    timeout: Duration,
}

impl<'a, R: ReadableStream> Utf8LineReader<'a, R> {
    pub fn new(stream: &'a R, lossy: bool) -> Self {
        Utf8LineReader { stream, lossy, timeout: Duration::ZERO }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the next line, trimming the trailing `\n` (and a preceding
    /// `\r`, if present). Returns `Ok(None)` once the underlying stream is
    /// exhausted with no further data — a closed stream that yields an
    /// empty chunk, not an error.
    pub async fn read_line(&self) -> Result<Option<String>, StreamError> {
        let chunk = match self.stream.read(0, Delimiter::Byte(b'\n'), self.timeout).await {
            Ok(chunk) => chunk,
            Err(StreamError::Unreadable) | Err(StreamError::Closed) => return Ok(None),
            Err(e) => return Err(e),
        };
        if chunk.is_empty() {
            return Ok(None);
        }

        let mut line = &chunk[..];
        if line.last() == Some(&b'\n') {
            line = &line[..line.len() - 1];
        }
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }

        if self.lossy {
            Ok(Some(String::from_utf8_lossy(line).into_owned()))
        } else {
            String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|_| StreamError::InvalidArgument("line is not valid utf-8"))
        }
    }
}
