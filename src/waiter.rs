use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

/// A one-shot completion cell a stream installs in place of an immediate
/// result: `pending -> resolved(value)`. The counterpart `Sender` lives in
/// the stream's internal slot (read slot or write-queue entry); the
/// `Waiter` is what the suspended caller awaits.
///
/// This is the async-native encoding §9 asks for in place of the source
/// library's dynamically dispatched continuation: resolution is a channel
/// send, and a timeout is composed on top rather than threaded through
/// every call site (see [`with_timeout`](Waiter::with_timeout)).
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    /// Creates a linked `(Sender, Waiter)` pair. The sender is stored by the
    /// stream; resolving it (`Sender::send`) is what wakes the waiter.
    pub fn new() -> (oneshot::Sender<T>, Waiter<T>) {
        let (tx, rx) = oneshot::channel();
        (tx, Waiter { rx })
    }

    /// Awaits resolution, rejecting with [`Elapsed`] if `timeout` passes
    /// first. `Duration::ZERO` disables the timeout, matching the source
    /// library's `timeout = 0` convention.
    pub async fn with_timeout(self, timeout: Duration) -> Result<T, WaiterOutcome> {
        if timeout.is_zero() {
            self.await.map_err(|_| WaiterOutcome::Cancelled)
        } else {
            match tokio::time::timeout(timeout, self).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(WaiterOutcome::Cancelled),
                Err(_elapsed) => Err(WaiterOutcome::Timeout),
            }
        }
    }
}

impl<T> Future for Waiter<T> {
    type Output = Result<T, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx)
    }
}

/// Why a [`Waiter`] failed to resolve with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterOutcome {
    /// The `Sender` half was dropped without resolving (the stream freed the
    /// slot without sending, e.g. during `close()`'s bulk rejection).
    Cancelled,
    /// The timeout attached via [`Waiter::with_timeout`] elapsed first.
    Timeout,
}
