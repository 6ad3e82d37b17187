//! Async rendezvous (zero-capacity) channel.
//!
//! A rendezvous channel hands elements of type `T` from producer tasks to
//! consumer tasks one at a time, with no buffering: a [`Sender::send`]
//! suspends until a [`Receiver::receive`] is there to accept it, and vice
//! versa. Every send is a hand-off to exactly one receive.
//!
//! ## How It Works
//!
//! ```text
//!                 channel state (one Mutex-guarded phase)
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            │                 │                  │
//!          Idle         SendersWaiting      ReceiversWaiting
//!     (no waiters)    (producers queued,   (consumers queued,
//!                      FIFO by arrival)      FIFO by arrival)
//! ```
//!
//! - A `send`/`receive` that finds the *other* side already waiting pairs
//!   with the head of that side's queue immediately.
//! - A `send`/`receive` that finds nobody waiting (or only its own side
//!   waiting) enqueues itself and suspends.
//! - Once paired, the element crosses in a **two-step hand-off**: the
//!   producer's suspension resolves with a handle to the matched consumer's
//!   suspension; the producer then writes the element directly into that
//!   handle. Neither step holds the channel's lock, so delivery can never
//!   deadlock against it.
//!
//! ## Cancellation
//!
//! Cancelling a `send` or `receive` is just dropping its future before it
//! resolves — the standard meaning of task cancellation in async Rust. A
//! dropped, still-queued future is removed from its wait queue; a dropped
//! future that already rendezvoused is too late to undo the hand-off (see
//! [`Sender::send`] and [`Receiver::receive`] for the exact guarantees).
//!
//! ## Termination
//!
//! [`Sender::finish`] / [`Receiver::finish`] immediately resolve every
//! queued waiter on both sides with a "finished" outcome and make all
//! further operations resolve the same way. Termination also happens
//! implicitly once every `Sender` clone (or every `Receiver` clone) has
//! been dropped, so a channel is never left with unreachable waiters just
//! because nobody remembered to call `finish` by hand.
//!
//! ## Example
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! let (tx, rx) = rendezvous::channel::<i32>();
//!
//! let producer = tokio::spawn(async move {
//!     tx.send(1).await.unwrap();
//!     tx.send(2).await.unwrap();
//! });
//!
//! assert_eq!(rx.receive().await, Ok(1));
//! assert_eq!(rx.receive().await, Ok(2));
//! producer.await.unwrap();
//! # }
//! ```

mod channel;
mod error;
mod receiver;
mod sender;
mod waiter;

use std::sync::Arc;

pub use error::{RecvError, SendError};
#[cfg(feature = "stream")]
pub use receiver::Incoming;
pub use receiver::{ReceiveFuture, Receiver};
pub use sender::{SendFuture, Sender};

use channel::Inner;

/// Creates a new rendezvous channel, returning its producer and consumer
/// handles.
///
/// The channel starts `Idle` and has no capacity: the first `send` and the
/// first `receive` to arrive each suspend until the other side shows up.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner::new());
    (Sender::new(inner.clone()), Receiver::new(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    /// S1: idle channel, receiver suspends first, sender completes the
    /// hand-off.
    #[tokio::test]
    async fn hand_off_receiver_first() {
        let (tx, rx) = channel::<i32>();
        let recv = tokio::spawn(async move { rx.receive().await });
        tokio::task::yield_now().await;
        tx.send(7).await.unwrap();
        assert_eq!(recv.await.unwrap(), Ok(7));
        assert!(!tx.is_finished());
    }

    /// S2: idle channel, sender suspends first, receiver completes the
    /// hand-off.
    #[tokio::test]
    async fn hand_off_sender_first() {
        let (tx, rx) = channel::<i32>();
        let send = tokio::spawn(async move { tx.send(7).await });
        tokio::task::yield_now().await;
        assert_eq!(rx.receive().await, Ok(7));
        send.await.unwrap().unwrap();
    }

    /// S3: two receivers queue in order, two sends arrive serially — each
    /// receiver gets the send that was issued for it, in order.
    #[tokio::test]
    async fn fifo_receivers() {
        let (tx, rx) = channel::<&'static str>();
        let rx1 = rx.clone();
        let rx2 = rx.clone();
        let r1 = tokio::spawn(async move { rx1.receive().await });
        tokio::task::yield_now().await;
        let r2 = tokio::spawn(async move { rx2.receive().await });
        tokio::task::yield_now().await;

        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();

        assert_eq!(r1.await.unwrap(), Ok("a"));
        assert_eq!(r2.await.unwrap(), Ok("b"));
    }

    /// S4 (symmetric): two senders queue in order, two receives arrive
    /// serially.
    #[tokio::test]
    async fn fifo_senders() {
        let (tx, rx) = channel::<&'static str>();
        let tx1 = tx.clone();
        let tx2 = tx.clone();
        let s1 = tokio::spawn(async move { tx1.send("a").await });
        tokio::task::yield_now().await;
        let s2 = tokio::spawn(async move { tx2.send("b").await });
        tokio::task::yield_now().await;

        assert_eq!(rx.receive().await, Ok("a"));
        assert_eq!(rx.receive().await, Ok("b"));

        s1.await.unwrap().unwrap();
        s2.await.unwrap().unwrap();
    }

    /// S4: finish drains all queued receivers with an error, and every
    /// subsequent operation resolves the same way without suspending.
    #[tokio::test]
    async fn finish_drains_queued_receivers() {
        let (tx, rx) = channel::<u32>();
        let rx1 = rx.clone();
        let rx2 = rx.clone();
        let r1 = tokio::spawn(async move { rx1.receive().await });
        let r2 = tokio::spawn(async move { rx2.receive().await });
        tokio::task::yield_now().await;

        tx.finish();

        assert_eq!(r1.await.unwrap(), Err(RecvError));
        assert_eq!(r2.await.unwrap(), Err(RecvError));
        assert_eq!(tx.send(0).await.unwrap_err().into_inner(), 0);
        assert_eq!(rx.receive().await, Err(RecvError));
    }

    /// S5: a cancelled receiver does not leave the channel stuck — a later
    /// send/receive pair still rendezvous normally.
    #[tokio::test]
    async fn cancelled_receiver_then_fresh_handoff() {
        let (tx, rx) = channel::<u32>();
        {
            let fut = rx.receive();
            tokio::pin!(fut);
            // poll once to register, then drop before it resolves
            let mut cx_check = std::future::poll_fn(|cx| {
                let _ = fut.as_mut().poll(cx);
                std::task::Poll::Ready(())
            });
            (&mut cx_check).await;
        }
        tx.send(9).await.unwrap();
        assert_eq!(rx.receive().await, Ok(9));
    }

    /// S6: dropping a receive future that was never polled never registers
    /// with the channel at all.
    #[test]
    fn cancel_before_first_poll_never_registers() {
        let (tx, rx) = channel::<u32>();
        let fut = rx.receive();
        drop(fut);
        assert!(!tx.is_finished());
    }

    /// Invariant 1/7: concurrent cancellation and rendezvous race but the
    /// waiter resolves exactly once either way.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_races_rendezvous_without_double_resume() {
        for _ in 0..200 {
            let (tx, rx) = channel::<u32>();
            let rx2 = rx.clone();
            let receiver = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    v = rx2.receive() => Some(v),
                    _ = tokio::task::yield_now() => None,
                }
            });
            let _ = tx.send(1).await;
            let _ = receiver.await.unwrap();
            // No assertion beyond "doesn't panic / doesn't hang": the
            // OneshotCell's single-winner resolve() is what this exercises.
        }
    }

    /// Invariant 2 (conservation): under concurrent senders and receivers,
    /// every element that's successfully sent is received exactly once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conservation_under_concurrency() {
        const N: usize = 500;
        let (tx, rx) = channel::<usize>();
        let received: StdArc<AtomicUsize> = StdArc::new(AtomicUsize::new(0));

        let mut senders = Vec::new();
        for i in 0..N {
            let tx = tx.clone();
            senders.push(tokio::spawn(async move { tx.send(i).await }));
        }
        drop(tx);

        let mut receivers = Vec::new();
        for _ in 0..N {
            let rx = rx.clone();
            let received = received.clone();
            receivers.push(tokio::spawn(async move {
                if rx.receive().await.is_ok() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        drop(rx);

        for s in senders {
            let _ = s.await.unwrap();
        }
        for r in receivers {
            r.await.unwrap();
        }

        assert_eq!(received.load(Ordering::SeqCst), N);
    }

    #[cfg(feature = "stream")]
    #[tokio::test]
    async fn iterator_stops_after_finish() {
        use futures::StreamExt;

        let (tx, rx) = channel::<u32>();
        let producer = tokio::spawn(async move {
            for i in 0..3 {
                tx.send(i).await.unwrap();
            }
            // tx dropped here -> implicit finish
        });

        let collected: Vec<u32> = rx.iter().collect().await;
        assert_eq!(collected, vec![0, 1, 2]);
        producer.await.unwrap();

        // sticky: polling again after termination yields None without
        // touching the channel
        let mut again = rx.iter();
        assert_eq!(again.next().await, None);
    }
}
