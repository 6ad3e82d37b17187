//! The channel's shared state machine: `Idle` / `SendersWaiting` /
//! `ReceiversWaiting` / `Finished`, plus the single critical section that
//! arbitrates every transition between them.
//!
//! Mirrors the shape of [`crate`]'s teacher (`Channel<T, N>` holding shared,
//! cache-padded state behind an `Arc`, split into a `Sender`/`Receiver`
//! pair) but replaces the lock-free ring buffer with a `Mutex`-guarded
//! phase, since a rendezvous channel has nothing to buffer — every
//! transition here touches the queue of whichever side is waiting, which
//! cannot be done lock-free without far more machinery than the ~300-line
//! budget this primitive affords.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_utils::CachePadded;

use crate::waiter::{ReceiveSlot, ReceiverHandle, SendSlot};

enum Phase<T> {
    Idle,
    SendersWaiting(BTreeMap<u64, Arc<SendSlot<T>>>),
    ReceiversWaiting(BTreeMap<u64, ReceiverHandle<T>>),
    Finished,
}

struct State<T> {
    phase: Phase<T>,
    generation: u64,
}

impl<T> State<T> {
    fn next_generation(&mut self) -> u64 {
        let g = self.generation;
        self.generation = self.generation.wrapping_add(1);
        g
    }
}

/// Outcome of attempting to register a `send`.
pub(crate) enum SendRegistration<T> {
    /// The channel is finished; nothing to do.
    Finished,
    /// Paired immediately with an already-waiting receiver. The caller still
    /// owns its element and must deliver it into the handle itself.
    Matched(ReceiverHandle<T>),
    /// No receiver was waiting; the caller is now queued under `generation`
    /// and must await its own [`SendSlot`].
    Queued(u64, Arc<SendSlot<T>>),
}

/// Outcome of attempting to register a `receive`.
pub(crate) enum ReceiveRegistration<T> {
    /// The channel is finished; nothing to do.
    Finished,
    /// Paired immediately with an already-waiting sender. The caller must
    /// hand the sender a fresh receive slot of its own and await it.
    Matched(Arc<SendSlot<T>>),
    /// No sender was waiting; the caller is now queued under `generation`
    /// and must await its own [`ReceiveSlot`].
    Queued(u64, ReceiverHandle<T>),
}

/// The channel's shared core: the state machine plus the two sides' live
/// handle counts that drive implicit termination (see [`Inner::release_sender`]
/// / [`Inner::release_receiver`]).
pub(crate) struct Inner<T> {
    state: CachePadded<Mutex<State<T>>>,
    senders: AtomicUsize,
    receivers: AtomicUsize,
}

impl<T> Inner<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: CachePadded::new(Mutex::new(State {
                phase: Phase::Idle,
                generation: 0,
            })),
            senders: AtomicUsize::new(1),
            receivers: AtomicUsize::new(1),
        }
    }

    pub(crate) fn acquire_sender(&self) {
        self.senders.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acquire_receiver(&self) {
        self.receivers.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases a sender handle. Returns `true` if this was the last one.
    pub(crate) fn release_sender(&self) -> bool {
        self.senders.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Releases a receiver handle. Returns `true` if this was the last one.
    pub(crate) fn release_receiver(&self) -> bool {
        self.receivers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.state.lock().unwrap().phase, Phase::Finished)
    }

    /// `receive()`'s `establish` + critical-section dispatch (§4.1), merged
    /// into a single lock acquisition: `Future::poll` is never preempted
    /// mid-call, so there is no observable window between the two in a
    /// poll-based implementation (see DESIGN.md).
    pub(crate) fn begin_receive(&self) -> ReceiveRegistration<T> {
        let mut guard = self.state.lock().unwrap();
        let result = match &mut guard.phase {
            Phase::Finished => ReceiveRegistration::Finished,
            Phase::SendersWaiting(queue) => {
                let (generation, sender) = queue
                    .pop_first()
                    .expect("SendersWaiting phase holds at least one waiter");
                if queue.is_empty() {
                    guard.phase = Phase::Idle;
                }
                ReceiveRegistration::Matched(sender)
            }
            Phase::Idle => {
                let generation = guard.next_generation();
                let slot: ReceiverHandle<T> = Arc::new(ReceiveSlot::new());
                let mut queue = BTreeMap::new();
                queue.insert(generation, slot.clone());
                guard.phase = Phase::ReceiversWaiting(queue);
                ReceiveRegistration::Queued(generation, slot)
            }
            Phase::ReceiversWaiting(queue) => {
                let generation = guard.next_generation();
                let slot: ReceiverHandle<T> = Arc::new(ReceiveSlot::new());
                queue.insert(generation, slot.clone());
                ReceiveRegistration::Queued(generation, slot)
            }
        };
        drop(guard);
        match &result {
            ReceiveRegistration::Finished => {}
            ReceiveRegistration::Matched(_) => {
                tracing::trace!("receive matched a waiting sender");
            }
            ReceiveRegistration::Queued(generation, _) => {
                tracing::trace!(generation, "receive queued");
            }
        }
        result
    }

    /// `send(x)`'s `establish` + critical-section dispatch, symmetric to
    /// [`Inner::begin_receive`].
    pub(crate) fn begin_send(&self) -> SendRegistration<T> {
        let mut guard = self.state.lock().unwrap();
        let result = match &mut guard.phase {
            Phase::Finished => SendRegistration::Finished,
            Phase::ReceiversWaiting(queue) => {
                let (generation, receiver) = queue
                    .pop_first()
                    .expect("ReceiversWaiting phase holds at least one waiter");
                if queue.is_empty() {
                    guard.phase = Phase::Idle;
                }
                SendRegistration::Matched(receiver)
            }
            Phase::Idle => {
                let generation = guard.next_generation();
                let slot = Arc::new(SendSlot::new());
                let mut queue = BTreeMap::new();
                queue.insert(generation, slot.clone());
                guard.phase = Phase::SendersWaiting(queue);
                SendRegistration::Queued(generation, slot)
            }
            Phase::SendersWaiting(queue) => {
                let generation = guard.next_generation();
                let slot = Arc::new(SendSlot::new());
                queue.insert(generation, slot.clone());
                SendRegistration::Queued(generation, slot)
            }
        };
        drop(guard);
        match &result {
            SendRegistration::Finished => {}
            SendRegistration::Matched(_) => {
                tracing::trace!("send matched a waiting receiver");
            }
            SendRegistration::Queued(generation, _) => {
                tracing::trace!(generation, "send queued");
            }
        }
        result
    }

    /// `cancelReceive(status, g)` (§4.2): removes the waiter `generation`
    /// from `ReceiversWaiting` if it is still there, and resolves it with
    /// `None`. A no-op if it already rendezvoused or was drained by `finish`.
    pub(crate) fn cancel_receive(&self, generation: u64) {
        let mut guard = self.state.lock().unwrap();
        let Phase::ReceiversWaiting(queue) = &mut guard.phase else {
            return;
        };
        let Some(slot) = queue.remove(&generation) else {
            return;
        };
        if queue.is_empty() {
            guard.phase = Phase::Idle;
        }
        drop(guard);
        tracing::trace!(generation, "receive cancelled while queued");
        slot.resolve(None);
    }

    /// `cancelSend(status, g)`, symmetric to [`Inner::cancel_receive`].
    pub(crate) fn cancel_send(&self, generation: u64) {
        let mut guard = self.state.lock().unwrap();
        let Phase::SendersWaiting(queue) = &mut guard.phase else {
            return;
        };
        let Some(slot) = queue.remove(&generation) else {
            return;
        };
        if queue.is_empty() {
            guard.phase = Phase::Idle;
        }
        drop(guard);
        tracing::trace!(generation, "send cancelled while queued");
        slot.resolve(None);
    }

    /// `finish()` (§4.1): unconditionally transitions to `Finished` and
    /// drains whichever queue was live, resuming every waiter with `None`.
    /// Idempotent and non-suspending.
    pub(crate) fn finish(&self) {
        let mut guard = self.state.lock().unwrap();
        let prior = std::mem::replace(&mut guard.phase, Phase::Finished);
        drop(guard);
        match prior {
            Phase::SendersWaiting(queue) => {
                tracing::debug!(drained = queue.len(), side = "senders", "channel finished");
                for (_, slot) in queue {
                    slot.resolve(None);
                }
            }
            Phase::ReceiversWaiting(queue) => {
                tracing::debug!(drained = queue.len(), side = "receivers", "channel finished");
                for (_, slot) in queue {
                    slot.resolve(None);
                }
            }
            Phase::Idle | Phase::Finished => {
                tracing::debug!("channel finished with no waiters to drain");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{Context, Poll, Wake};

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn noop_cx() -> Context<'static> {
        let waker = std::task::Waker::from(Arc::new(NoopWaker));
        Context::from_waker(Box::leak(Box::new(waker)))
    }

    #[test]
    fn idle_receive_then_send_rendezvous() {
        let inner = Inner::<u32>::new();
        let ReceiveRegistration::Queued(_, recv_slot) = inner.begin_receive() else {
            panic!("expected Queued");
        };
        let SendRegistration::Matched(handle) = inner.begin_send() else {
            panic!("expected Matched");
        };
        assert!(handle.resolve(Some(7)));
        let mut cx = noop_cx();
        assert_eq!(recv_slot.poll(&mut cx), Poll::Ready(Some(7)));
        assert!(inner.state.lock().unwrap().phase_is_idle());
    }

    impl<T> State<T> {
        fn phase_is_idle(&self) -> bool {
            matches!(self.phase, Phase::Idle)
        }
    }

    #[test]
    fn fifo_receivers() {
        let inner = Inner::<&'static str>::new();
        let ReceiveRegistration::Queued(g1, r1) = inner.begin_receive() else {
            panic!()
        };
        let ReceiveRegistration::Queued(g2, r2) = inner.begin_receive() else {
            panic!()
        };
        assert!(g1 < g2);

        let SendRegistration::Matched(h1) = inner.begin_send() else {
            panic!()
        };
        h1.resolve(Some("a"));
        let SendRegistration::Matched(h2) = inner.begin_send() else {
            panic!()
        };
        h2.resolve(Some("b"));

        let mut cx = noop_cx();
        assert_eq!(r1.poll(&mut cx), Poll::Ready(Some("a")));
        assert_eq!(r2.poll(&mut cx), Poll::Ready(Some("b")));
    }

    #[test]
    fn finish_drains_receivers() {
        let inner = Inner::<u32>::new();
        let ReceiveRegistration::Queued(_, r1) = inner.begin_receive() else {
            panic!()
        };
        let ReceiveRegistration::Queued(_, r2) = inner.begin_receive() else {
            panic!()
        };
        inner.finish();
        let mut cx = noop_cx();
        assert_eq!(r1.poll(&mut cx), Poll::Ready(None));
        assert_eq!(r2.poll(&mut cx), Poll::Ready(None));
        assert!(matches!(inner.begin_receive(), ReceiveRegistration::Finished));
    }

    #[test]
    fn cancel_receive_removes_from_queue() {
        let inner = Inner::<u32>::new();
        let ReceiveRegistration::Queued(g, slot) = inner.begin_receive() else {
            panic!()
        };
        inner.cancel_receive(g);
        let mut cx = noop_cx();
        assert_eq!(slot.poll(&mut cx), Poll::Ready(None));
        assert!(inner.state.lock().unwrap().phase_is_idle());

        // Subsequent send should not see a dead queued receiver.
        let SendRegistration::Queued(..) = inner.begin_send() else {
            panic!("expected a fresh queued sender, not a stale match")
        };
    }

    #[test]
    fn cancel_after_rendezvous_is_a_noop() {
        let inner = Inner::<u32>::new();
        let ReceiveRegistration::Queued(g, slot) = inner.begin_receive() else {
            panic!()
        };
        let SendRegistration::Matched(handle) = inner.begin_send() else {
            panic!()
        };
        assert!(handle.resolve(Some(5)));
        // too late: already rendezvoused and removed from the queue
        inner.cancel_receive(g);
        let mut cx = noop_cx();
        assert_eq!(slot.poll(&mut cx), Poll::Ready(Some(5)));
    }
}
