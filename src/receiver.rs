use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::channel::{Inner, ReceiveRegistration};
use crate::error::RecvError;
use crate::waiter::{ReceiveSlot, ReceiverHandle};

/// The consumer side of a rendezvous channel.
///
/// `Receiver` is cloneable: any number of tasks may hold and use one
/// concurrently. The channel is only driven to [`Receiver::finish`]
/// implicitly once every clone of `Receiver` has been dropped.
pub struct Receiver<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Receiver<T> {
    pub(crate) fn new(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Receives an element, suspending until a sender offers one.
    ///
    /// Resolves to `Ok(x)` once an element has been handed off, or to
    /// `Err(RecvError)` if the channel finished (or finishes while this
    /// call is suspended) before a sender arrived.
    ///
    /// # Cancel safety
    ///
    /// Dropping this future before it resolves is always safe and never
    /// loses an element that was not already handed to it: if it had not
    /// yet been paired with a sender, it is simply removed from the wait
    /// queue. If cancellation races with a concurrent rendezvous, the
    /// rendezvous wins (§4.2/§9) and the delivered element is dropped along
    /// with this future instead of being returned.
    pub fn receive(&self) -> ReceiveFuture<'_, T> {
        ReceiveFuture::new(self)
    }

    /// Terminates the channel immediately: every waiter on either side (not
    /// just this handle's side) is resumed with a "finished" outcome.
    /// Idempotent.
    pub fn finish(&self) {
        self.inner.finish();
    }

    /// Returns `true` once the channel has been finished, either explicitly
    /// or because every handle on one side has been dropped.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// A [`futures_core::Stream`] view over repeated [`Receiver::receive`]
    /// calls: a thin wrapper (§6) that becomes sticky on the first
    /// finished/cancelled outcome, after which it always yields `None`
    /// without touching the channel again.
    #[cfg(feature = "stream")]
    pub fn iter(&self) -> Incoming<'_, T> {
        Incoming::new(self)
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.inner.acquire_receiver();
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if self.inner.release_receiver() {
            self.inner.finish();
        }
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

/// Tracks a [`ReceiveFuture`]'s progress through the critical-section
/// dispatch.
enum Registration<T> {
    NotStarted,
    /// Queued in `ReceiversWaiting`; cancellable by generation.
    Queued(u64, ReceiverHandle<T>),
    /// Paired immediately with an already-waiting sender: this future
    /// handed the sender a fresh slot of its own and is now awaiting
    /// delivery into it. Never resident in any queue, so cancellation here
    /// is a pure no-op (§4.2(c): "too late, ignored").
    Matched(ReceiverHandle<T>),
    Done,
}

/// The future returned by [`Receiver::receive`].
#[must_use = "futures do nothing unless polled"]
pub struct ReceiveFuture<'a, T> {
    receiver: &'a Receiver<T>,
    registration: Registration<T>,
}

/// Not self-referential: none of its fields point into the struct itself.
impl<T> Unpin for ReceiveFuture<'_, T> {}

impl<'a, T> ReceiveFuture<'a, T> {
    fn new(receiver: &'a Receiver<T>) -> Self {
        Self {
            receiver,
            registration: Registration::NotStarted,
        }
    }
}

impl<T> Future for ReceiveFuture<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match std::mem::replace(&mut self.registration, Registration::Done) {
                Registration::NotStarted => match self.receiver.inner.begin_receive() {
                    ReceiveRegistration::Finished => {
                        return Poll::Ready(Err(RecvError));
                    }
                    ReceiveRegistration::Matched(sender) => {
                        let my_slot: ReceiverHandle<T> = Arc::new(ReceiveSlot::new());
                        // Hand the matched sender our own slot so it can
                        // complete the second step of the hand-off outside
                        // any lock; we still have to wait for that delivery.
                        sender.resolve(Some(my_slot.clone()));
                        self.registration = Registration::Matched(my_slot);
                    }
                    ReceiveRegistration::Queued(generation, slot) => {
                        self.registration = Registration::Queued(generation, slot);
                    }
                },
                Registration::Queued(generation, slot) => match slot.poll(cx) {
                    Poll::Pending => {
                        self.registration = Registration::Queued(generation, slot);
                        return Poll::Pending;
                    }
                    Poll::Ready(value) => {
                        return Poll::Ready(value.ok_or(RecvError));
                    }
                },
                Registration::Matched(slot) => match slot.poll(cx) {
                    Poll::Pending => {
                        self.registration = Registration::Matched(slot);
                        return Poll::Pending;
                    }
                    Poll::Ready(value) => {
                        return Poll::Ready(value.ok_or(RecvError));
                    }
                },
                Registration::Done => panic!("ReceiveFuture polled after completion"),
            }
        }
    }
}

impl<T> Drop for ReceiveFuture<'_, T> {
    fn drop(&mut self) {
        if let Registration::Queued(generation, _) = &self.registration {
            self.receiver.inner.cancel_receive(*generation);
        }
    }
}

#[cfg(feature = "stream")]
mod stream {
    use super::*;
    use futures::Stream;

    /// A sticky, one-shot-terminating stream over repeated [`Receiver::receive`]
    /// calls. See [`Receiver::iter`].
    #[must_use = "streams do nothing unless polled"]
    pub struct Incoming<'a, T> {
        receiver: &'a Receiver<T>,
        current: Option<ReceiveFuture<'a, T>>,
        done: bool,
    }

    impl<'a, T> Incoming<'a, T> {
        pub(super) fn new(receiver: &'a Receiver<T>) -> Self {
            Self {
                receiver,
                current: None,
                done: false,
            }
        }
    }

    impl<T> Unpin for Incoming<'_, T> {}

    impl<T> Stream for Incoming<'_, T> {
        type Item = T;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
            if self.done {
                return Poll::Ready(None);
            }
            if self.current.is_none() {
                self.current = Some(self.receiver.receive());
            }
            let fut = self.current.as_mut().expect("just inserted");
            match Pin::new(fut).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(value)) => {
                    self.current = None;
                    Poll::Ready(Some(value))
                }
                Poll::Ready(Err(_)) => {
                    self.done = true;
                    self.current = None;
                    Poll::Ready(None)
                }
            }
        }
    }
}

#[cfg(feature = "stream")]
pub use stream::Incoming;
