//! Error types for the two ambient failure outcomes a caller can observe.
//!
//! The core itself has no error type (§7): every negative outcome is a bare
//! `None`. These wrap that `None` in named, `std::error::Error`-implementing
//! types the way the teacher crate wraps its own bounded-channel outcomes in
//! `TrySendErr<T>` / `TryRecvError`, rather than leaving callers to interpret
//! an unadorned `Option`.

use std::error::Error;
use std::fmt;

/// Returned by [`crate::Sender::send`] when the element was not delivered:
/// the channel finished, or the sending task was cancelled before a
/// receiver arrived. Carries the element back so it is not silently lost.
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: channel is finished")
    }
}

impl<T> Error for SendError<T> {}

impl<T> SendError<T> {
    /// Returns the element that failed to be delivered.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Returned by [`crate::Receiver::receive`] when no element was delivered:
/// the channel finished, or the receiving task was cancelled before a
/// sender arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receive failed: channel is finished")
    }
}

impl Error for RecvError {}
