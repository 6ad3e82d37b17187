//! The one-shot resolution cell backing every suspended `send`/`receive`.
//!
//! A [`OneshotCell`] is the Rust-native "continuation" from the state-machine
//! design: it is created when an operation suspends, handed to whoever will
//! eventually resume it (a rendezvous partner, `finish`, or cancellation),
//! and resolved at most once. Polling it is how the owning `Future` waits;
//! resolving it is how a peer delivers the outcome without ever holding the
//! channel's lock while doing so.
//!
//! The waker half is [`futures::task::AtomicWaker`], the same primitive the
//! teacher crate's `Wakers` (`examples/fedemagnani-veloce/src/spsc/channel.rs`)
//! registers/wakes against instead of a hand-rolled `Mutex<Option<Waker>>`.
//! Only the value slot needs its own mutex here, since a rendezvous waiter
//! also carries a payload that `AtomicWaker` alone has no room for.

use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

enum Slot<V> {
    Pending,
    Ready(V),
    /// The `Future` side has already taken the value out via `poll`.
    Taken,
}

struct OneshotCell<V> {
    slot: Mutex<Slot<V>>,
    waker: AtomicWaker,
}

impl<V> OneshotCell<V> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            waker: AtomicWaker::new(),
        }
    }

    /// Polls for the resolved value, registering `cx`'s waker if not yet resolved.
    ///
    /// Registers before checking the slot, not after, so a `resolve` that
    /// races this call can never wake a waker we haven't registered yet.
    ///
    /// # Panics
    ///
    /// Panics if polled again after it has already yielded `Poll::Ready`, matching
    /// the standard `Future` contract.
    fn poll(&self, cx: &mut Context<'_>) -> Poll<V> {
        self.waker.register(cx.waker());
        let mut guard = self.slot.lock().unwrap();
        match &mut *guard {
            Slot::Ready(_) => {
                let Slot::Ready(value) = std::mem::replace(&mut *guard, Slot::Taken) else {
                    unreachable!()
                };
                Poll::Ready(value)
            }
            Slot::Pending => Poll::Pending,
            Slot::Taken => panic!("polled after completion"),
        }
    }

    /// Resolves the cell with `value` unless it has already been resolved.
    ///
    /// Returns `true` if this call performed the resolution. This is the
    /// single-resume guarantee: a cell can be the target of a rendezvous,
    /// a `finish` drain, and a racing cancellation, but only the first of
    /// those to reach this method wins.
    fn resolve(&self, value: V) -> bool {
        let mut guard = self.slot.lock().unwrap();
        if matches!(&*guard, Slot::Pending) {
            *guard = Slot::Ready(value);
            drop(guard);
            self.waker.wake();
            true
        } else {
            false
        }
    }
}

/// The continuation of a suspended `receive()`: resumed with `Some(x)` on a
/// successful hand-off, or `None` on cancellation / `finish`.
pub(crate) struct ReceiveSlot<T> {
    cell: OneshotCell<Option<T>>,
}

impl<T> ReceiveSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OneshotCell::new(),
        }
    }

    pub(crate) fn poll(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.cell.poll(cx)
    }

    /// Delivers the element (or resolves to "finished"/"cancelled" with `None`).
    ///
    /// Returns `true` if this call actually performed the resolution; a
    /// caller delivering an element should treat `false` as "the receiver
    /// is gone" and drop the element rather than silently losing track of it.
    pub(crate) fn resolve(&self, value: Option<T>) -> bool {
        self.cell.resolve(value)
    }
}

/// A receiver's resume handle, handed to a matched producer so it can
/// complete the second step of the hand-off from outside the channel's lock.
pub(crate) type ReceiverHandle<T> = std::sync::Arc<ReceiveSlot<T>>;

/// The continuation of a suspended `send()`: resumed with `Some(handle)` once
/// paired with a receiver, or `None` on cancellation / `finish`.
pub(crate) struct SendSlot<T> {
    cell: OneshotCell<Option<ReceiverHandle<T>>>,
}

impl<T> SendSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OneshotCell::new(),
        }
    }

    pub(crate) fn poll(&self, cx: &mut Context<'_>) -> Poll<Option<ReceiverHandle<T>>> {
        self.cell.poll(cx)
    }

    pub(crate) fn resolve(&self, value: Option<ReceiverHandle<T>>) -> bool {
        self.cell.resolve(value)
    }
}
