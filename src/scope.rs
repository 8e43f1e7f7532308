//! Cancellation scope shared by every processor, plus the send/receive
//! helpers that make every suspension point cancellation-checked.

use tokio_util::sync::CancellationToken;

use crate::result::StreamResult;

/// A cancellation handle threaded through a pipeline. Canceling a `Scope`
/// propagates to every processor holding it (and to every child scope
/// derived from it), which is how a pipeline shuts down without leaks.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derives a child scope: canceling `self` cancels the child too, but
    /// canceling the child does not cancel `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this scope (or an ancestor) is canceled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Default capacity for internal channels with no caller-specified size.
/// Large enough that ordinary pipelines never block on it in practice;
/// processors that need a different policy (Split, SlidingBuffer,
/// DroppingBuffer) take an explicit size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Tokio's `mpsc` has no true zero-capacity (rendezvous) mode; callers that
/// ask for a buffer size of 0 get the closest analogue, capacity 1.
pub fn coerce_channel_capacity(requested: usize) -> usize {
    requested.max(1)
}

pub type StreamSender<T> = tokio::sync::mpsc::Sender<StreamResult<T>>;
pub type StreamReceiver<T> = tokio::sync::mpsc::Receiver<StreamResult<T>>;

/// Sends `item` on `tx`, racing the send against cancellation.
///
/// Returns `true` if the caller should stop producing (either the scope was
/// canceled or the receiver was dropped), `false` if the send succeeded.
pub async fn send_or_cancel<T: Send>(tx: &StreamSender<T>, scope: &Scope, item: StreamResult<T>) -> bool {
    tokio::select! {
        biased;
        _ = scope.cancelled() => true,
        result = tx.send(item) => result.is_err(),
    }
}

/// Sends `item` on `tx` without racing cancellation, for use in the final
/// flush a few processors (Batcher, the window processors) perform after
/// cancellation has already been observed. Returns `true` if the receiver
/// has gone away and the caller should stop flushing.
pub async fn send_best_effort<T: Send>(tx: &StreamSender<T>, item: StreamResult<T>) -> bool {
    tx.send(item).await.is_err()
}

/// Receives from `rx`, racing the receive against cancellation.
///
/// Returns `None` if the caller should stop (scope canceled or input
/// exhausted), distinguishable from upstream closure only in that a caller
/// generally treats both identically: stop reading, begin shutdown.
pub async fn recv_or_cancel<T: Send>(rx: &mut StreamReceiver<T>, scope: &Scope) -> Option<StreamResult<T>> {
    tokio::select! {
        biased;
        _ = scope.cancelled() => None,
        item = rx.recv() => item,
    }
}
