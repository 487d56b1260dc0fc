//! Single-fulfillment connection futures.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{EndpointError, EndpointResult};
use crate::types::Address;

struct PendingShared {
    address: Address,
    cancelled: AtomicBool,
    settled: AtomicBool,
    abort: CancellationToken,
}

/// The future returned by `connect` and `listen`.
///
/// It is fulfilled or failed exactly once. Cancelling it before settlement
/// trips an abort signal the endpoint task listens on, and guarantees the
/// eventual failure is [`EndpointError::ConnectingCancelled`] carrying the
/// target address. Cancelling twice, or after settlement, is a no-op.
pub struct PendingConnection<T> {
    rx: oneshot::Receiver<EndpointResult<T>>,
    shared: Arc<PendingShared>,
}

/// The settlement side of a [`PendingConnection`].
///
/// Cloneable so the wrapping layer and the endpoint task can both hold it;
/// whichever settles first wins, the rest are no-ops.
pub struct Completion<T> {
    tx: Arc<StdMutex<Option<oneshot::Sender<EndpointResult<T>>>>>,
    shared: Arc<PendingShared>,
}

impl<T> PendingConnection<T> {
    /// Creates a pending connection targeting `address`, paired with its
    /// completion handle.
    pub fn new(address: Address) -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(PendingShared {
            address,
            cancelled: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            abort: CancellationToken::new(),
        });
        let pending = Self {
            rx,
            shared: Arc::clone(&shared),
        };
        let completion = Completion {
            tx: Arc::new(StdMutex::new(Some(tx))),
            shared,
        };
        (pending, completion)
    }

    /// The address this attempt is directed at.
    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    /// Whether the future has been fulfilled or failed.
    pub fn is_settled(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }

    /// Cancels the attempt.
    ///
    /// If the future is still unsettled this signals the in-flight
    /// low-level operation to abort; the resulting failure is reported as
    /// [`EndpointError::ConnectingCancelled`]. Otherwise this does nothing.
    pub fn cancel(&self) {
        if self.shared.settled.load(Ordering::SeqCst) {
            return;
        }
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            self.shared.abort.cancel();
        }
    }
}

impl<T> Future for PendingConnection<T> {
    type Output = EndpointResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(EndpointError::Connect(
                "connection attempt was abandoned".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PendingConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingConnection")
            .field("address", &self.shared.address)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Completion<T> {
    /// Fulfills the future, unless it was already settled or cancelled.
    ///
    /// Fulfilling a cancelled attempt settles it with the cancellation
    /// failure instead: a cancelled future never yields a success.
    pub fn fulfill(&self, value: T) {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            self.settle(Err(self.cancellation_error()));
        } else {
            self.settle(Ok(value));
        }
    }

    /// Fails the future, unless it was already settled.
    ///
    /// A failure arriving for an attempt already marked cancelled is
    /// translated into the cancellation-specific error carrying the target
    /// address rather than the generic one.
    pub fn fail(&self, error: EndpointError) {
        let error = if self.shared.cancelled.load(Ordering::SeqCst)
            && !matches!(error, EndpointError::ConnectingCancelled { .. })
        {
            self.cancellation_error()
        } else {
            error
        };
        self.settle(Err(error));
    }

    /// The token the endpoint task selects on to abort the low-level
    /// attempt when the future is cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.abort.clone()
    }

    /// The address this attempt is directed at.
    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    fn cancellation_error(&self) -> EndpointError {
        EndpointError::ConnectingCancelled {
            address: self.shared.address.clone(),
        }
    }

    fn settle(&self, result: EndpointResult<T>) {
        let sender = self.tx.lock().expect("completion mutex poisoned").take();
        if let Some(tx) = sender {
            self.shared.settled.store(true, Ordering::SeqCst);
            // The receiver may already be gone; nobody to tell.
            let _ = tx.send(result);
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("address", &self.shared.address)
            .field("settled", &self.shared.settled.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Address {
        Address::HostPort {
            host: "example.com".into(),
            port: 80,
        }
    }

    #[tokio::test]
    async fn test_fulfill_once() {
        let (pending, completion) = PendingConnection::new(target());
        completion.fulfill(7_u32);
        completion.fulfill(8);
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_fail_after_fulfill_is_ignored() {
        let (pending, completion) = PendingConnection::<u32>::new(target());
        completion.fulfill(7);
        completion.fail(EndpointError::Connect("late".into()));
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_translates_failure() {
        let (pending, completion) = PendingConnection::<u32>::new(target());
        pending.cancel();
        assert!(completion.cancellation().is_cancelled());
        completion.fail(EndpointError::Connect("attempt aborted".into()));
        assert_eq!(
            pending.await.unwrap_err(),
            EndpointError::ConnectingCancelled { address: target() }
        );
    }

    #[tokio::test]
    async fn test_cancel_suppresses_late_success() {
        let (pending, completion) = PendingConnection::<u32>::new(target());
        pending.cancel();
        pending.cancel();
        completion.fulfill(7);
        assert_eq!(
            pending.await.unwrap_err(),
            EndpointError::ConnectingCancelled { address: target() }
        );
    }

    #[tokio::test]
    async fn test_cancel_after_settlement_is_noop() {
        let (pending, completion) = PendingConnection::<u32>::new(target());
        completion.fulfill(7);
        pending.cancel();
        assert!(!completion.cancellation().is_cancelled());
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_completion_fails_the_future() {
        let (pending, completion) = PendingConnection::<u32>::new(target());
        drop(completion);
        assert!(matches!(
            pending.await.unwrap_err(),
            EndpointError::Connect(_)
        ));
    }
}
