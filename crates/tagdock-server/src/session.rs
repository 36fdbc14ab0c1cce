//! Exclusive ownership of the reader.
//!
//! [`ReaderGate`] hands out at most one [`ReaderToken`] at a time;
//! holding the token is the only way to reach the hardware, so two
//! writes can never interleave on the bus. The token releases on drop,
//! including panic unwind, and cannot be cloned, so a double release
//! is unrepresentable.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// The reader is held by another session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("reader is busy")]
pub struct Busy;

/// Single-owner gate over the reader.
pub struct ReaderGate<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for ReaderGate<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> ReaderGate<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    /// Acquire exclusive access to the reader.
    ///
    /// A zero `wait` fails fast; otherwise the caller queues behind
    /// the current holder for at most `wait`. Waiters are served in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] when the reader is not free within `wait`.
    pub async fn acquire(&self, wait: Duration) -> Result<ReaderToken<R>, Busy> {
        let guard = if wait.is_zero() {
            Arc::clone(&self.inner).try_lock_owned().map_err(|_| Busy)?
        } else {
            tokio::time::timeout(wait, Arc::clone(&self.inner).lock_owned())
                .await
                .map_err(|_| Busy)?
        };
        trace!("reader acquired");
        Ok(ReaderToken { guard })
    }

    /// Whether a session currently holds the reader.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Proof of exclusive reader ownership; derefs to the reader itself.
pub struct ReaderToken<R> {
    guard: OwnedMutexGuard<R>,
}

impl<R> fmt::Debug for ReaderToken<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderToken").finish_non_exhaustive()
    }
}

impl<R> Deref for ReaderToken<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.guard
    }
}

impl<R> DerefMut for ReaderToken<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.guard
    }
}

impl<R> Drop for ReaderToken<R> {
    fn drop(&mut self) {
        trace!("reader released");
    }
}
