use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::channel::{Inner, SendRegistration};
use crate::error::SendError;
use crate::waiter::{ReceiverHandle, SendSlot};

/// The producer side of a rendezvous channel.
///
/// `Sender` is cloneable: any number of tasks may hold and use one
/// concurrently. The channel is only driven to [`Sender::finish`] implicitly
/// once every clone (across both sides is not required — see
/// [`crate::Receiver`]) of `Sender` has been dropped.
pub struct Sender<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Sender<T> {
    pub(crate) fn new(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Sends `value`, suspending until a receiver accepts it.
    ///
    /// Resolves to `Ok(())` once the element has been handed off, or to
    /// `Err(SendError(value))` if the channel finished (or finishes while
    /// this call is suspended) before a receiver arrived.
    ///
    /// # Cancel safety
    ///
    /// Dropping this future before it resolves is always safe: if it had
    /// not yet been paired with a receiver, `value` is dropped along with
    /// it and no channel state is left behind. If cancellation races with
    /// a concurrent rendezvous, the rendezvous wins and delivery proceeds
    /// as if the drop had happened a moment later (§4.2/§9).
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        SendFuture::new(self, value)
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
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.acquire_sender();
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.inner.release_sender() {
            self.inner.finish();
        }
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

/// Tracks whether a [`SendFuture`] has started its critical-section dispatch
/// yet, and if so, whether it matched immediately or is queued awaiting a
/// partner.
enum Registration<T> {
    NotStarted,
    Queued(u64, Arc<SendSlot<T>>),
    Done,
}

/// The future returned by [`Sender::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    sender: &'a Sender<T>,
    value: Option<T>,
    registration: Registration<T>,
}

/// Not self-referential: none of its fields point into the struct itself.
impl<T> Unpin for SendFuture<'_, T> {}

impl<'a, T> SendFuture<'a, T> {
    fn new(sender: &'a Sender<T>, value: T) -> Self {
        Self {
            sender,
            value: Some(value),
            registration: Registration::NotStarted,
        }
    }

    fn deliver(&mut self, handle: ReceiverHandle<T>) -> Poll<Result<(), SendError<T>>> {
        let value = self.value.take().expect("SendFuture polled after completion");
        // `resolve` can lose the race to a concurrent `cancelReceive`, in
        // which case the receiver is gone and the element is simply dropped
        // — equivalent to the core's "element does not touch channel state".
        handle.resolve(Some(value));
        Poll::Ready(Ok(()))
    }
}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match std::mem::replace(&mut self.registration, Registration::Done) {
                Registration::NotStarted => match self.sender.inner.begin_send() {
                    SendRegistration::Finished => {
                        let value = self.value.take().unwrap();
                        return Poll::Ready(Err(SendError(value)));
                    }
                    SendRegistration::Matched(handle) => {
                        return self.deliver(handle);
                    }
                    SendRegistration::Queued(generation, slot) => {
                        self.registration = Registration::Queued(generation, slot);
                        // loop: poll the freshly-queued slot below so its
                        // waker is registered before we return.
                    }
                },
                Registration::Queued(generation, slot) => match slot.poll(cx) {
                    Poll::Pending => {
                        self.registration = Registration::Queued(generation, slot);
                        return Poll::Pending;
                    }
                    Poll::Ready(Some(handle)) => {
                        return self.deliver(handle);
                    }
                    Poll::Ready(None) => {
                        let value =
                            self.value.take().expect("SendFuture polled after completion");
                        return Poll::Ready(Err(SendError(value)));
                    }
                },
                Registration::Done => panic!("SendFuture polled after completion"),
            }
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let Registration::Queued(generation, _) = &self.registration {
            self.sender.inner.cancel_send(*generation);
        }
    }
}
