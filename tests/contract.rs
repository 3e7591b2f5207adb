//! Black-box integration tests against the public `ReadableStream` /
//! `WritableStream` / `Stream` contract, exercised through `MemoryStream`.
//! Companion to the unit tests inside each module: those pin down internal
//! framing details, these pin down the end-to-end scenarios and quantified
//! properties spec'd against the crate's public surface (§8).

use std::time::Duration;

use bytes::Bytes;
use flow_stream::{pipe, Delimiter, MemoryStream, ReadableStream, StreamError, WritableStream};
use tokio::task::LocalSet;

/// Initializes the `tracing` subscriber so the `debug!`/`trace!` events
/// `MemoryStream` emits on backpressure and close (§11's ambient logging) are
/// actually captured while running the suite, instead of going nowhere.
/// Idempotent: `try_init` is a no-op on every call after the first.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn stream(hwm: i64) -> MemoryStream {
    MemoryStream::new(hwm, Bytes::new())
}

#[tokio::test]
async fn data_is_preserved_across_split_writes_and_reads() {
    let s = stream(0);
    s.write(&b"hello, "[..], Duration::ZERO).await.unwrap();
    s.write(&b"world"[..], Duration::ZERO).await.unwrap();
    let all = s.read_all().await.unwrap();
    assert_eq!(&all[..], b"hello, world");
}

#[tokio::test]
async fn framing_falls_back_to_drain_when_delimiter_absent() {
    let s = MemoryStream::new(0, Bytes::from_static(b"no delimiter here"));
    let got = s.read(0, Delimiter::Byte(b'!'), Duration::ZERO).await.unwrap();
    assert_eq!(&got[..], b"no delimiter here");
}

#[tokio::test]
async fn backpressure_timeout_is_fatal_to_the_whole_stream() {
    init_tracing();
    let s = stream(4);
    s.write(&b"abcd"[..], Duration::ZERO).await.unwrap();

    LocalSet::new()
        .run_until(async {
            let blocked = tokio::task::spawn_local({
                let s = s.clone();
                async move { s.write(&b"e"[..], Duration::from_millis(20)).await }
            });
            let other = tokio::task::spawn_local({
                let s = s.clone();
                async move { s.write(&b"f"[..], Duration::from_secs(5)).await }
            });
            tokio::task::yield_now().await;

            let first = blocked.await.unwrap();
            assert!(matches!(first, Err(StreamError::Timeout)));
            // The second queued writer is freed by the same fatal timeout,
            // not left hanging (§4.2 point 5, §4.3's fatal-writer-timeout row).
            let second = other.await.unwrap();
            assert!(second.is_err());
            assert!(!s.is_open());
        })
        .await;
}

#[tokio::test]
async fn pipe_stops_exactly_at_length_cap() {
    let from = MemoryStream::new(0, Bytes::from_static(b"abcdefghijklmnopqrstuvwxyz"));
    let to = stream(0);

    let n = pipe(&from, &to, false, 10, Delimiter::None, Duration::ZERO).await.unwrap();
    assert_eq!(n, 10);
    assert_eq!(&to.read_all().await.unwrap()[..], b"abcdefghij");
    // `from` still holds the remainder; pipe did not over-read.
    assert_eq!(&from.read_all().await.unwrap()[..], b"klmnopqrstuvwxyz");
}

#[tokio::test]
async fn pipe_propagates_a_read_error_and_still_ends_destination() {
    init_tracing();
    let from = stream(0);
    let to = stream(0);

    LocalSet::new()
        .run_until(async {
            let piping = tokio::task::spawn_local({
                let from = from.clone();
                let to = to.clone();
                async move { pipe(&from, &to, true, 0, Delimiter::Byte(b'!'), Duration::from_secs(5)).await }
            });
            tokio::task::yield_now().await;
            from.close(); // the pending read inside pipe rejects with Closed
            let result = piping.await.unwrap();
            assert!(result.is_err());
            assert!(!to.is_writable());
        })
        .await;
}

#[tokio::test]
async fn a_fresh_read_after_cancellation_behaves_like_a_virgin_read() {
    let s = stream(0);
    LocalSet::new()
        .run_until(async {
            let handle = tokio::task::spawn_local({
                let s = s.clone();
                async move { s.read(0, Delimiter::None, Duration::from_secs(30)).await }
            });
            tokio::task::yield_now().await;
            handle.abort();
            let _ = handle.await;
        })
        .await;

    assert!(s.is_open()); // cancellation doesn't close the stream
    s.write(&b"fresh"[..], Duration::ZERO).await.unwrap();
    assert_eq!(&s.read_all().await.unwrap()[..], b"fresh");
}

#[tokio::test]
async fn half_close_keeps_stream_open_until_buffer_drains() {
    let s = MemoryStream::new(0, Bytes::from_static(b"tail"));
    s.end(Bytes::new(), Duration::ZERO).await.unwrap();
    assert!(!s.is_writable());
    assert!(s.is_open());
    let got = s.read_all().await.unwrap();
    assert_eq!(&got[..], b"tail");
    assert!(!s.is_open());
}
