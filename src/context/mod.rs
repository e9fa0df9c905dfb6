//! Per-call cancellation and deadline signal.
//!
//! A [`Context`] is created by the caller and passed explicitly into every
//! counting call. Clones share one cancel flag; a derived context can add a
//! deadline without affecting its parent. Nothing here is process-global.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{Error, Result};


/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Canceled => f.write_str("context canceled"),
            CancelCause::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelCause {}

impl From<CancelCause> for Error {
    fn from(cause: CancelCause) -> Self {
        match cause {
            CancelCause::Canceled => Error::Canceled,
            CancelCause::DeadlineExceeded => Error::DeadlineExceeded,
        }
    }
}

struct Signal {
    cancelled: AtomicBool,
    /// Dropped on cancel so every `done_rx` clone disconnects at once.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

/// Cancellation/timeout signal for one counting call.
#[derive(Clone)]
pub struct Context {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh cancellable context with no deadline.
    pub fn new() -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        Self {
            signal: Arc::new(Signal {
                cancelled: AtomicBool::new(false),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
            }),
            deadline: None,
        }
    }

    /// A context nobody else holds; it is never done unless `cancel` is called on it.
    pub fn background() -> Self {
        Self::new()
    }

    /// Derive a context that shares this one's cancel signal and also expires
    /// at `deadline`. The earlier of the two deadlines wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            signal: Arc::clone(&self.signal),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel this context and every clone or derivative of it. Idempotent.
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::Release);
        self.signal
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    /// An explicit cancel takes precedence over an expired deadline.
    #[inline]
    pub fn cause(&self) -> Option<CancelCause> {
        if self.signal.cancelled.load(Ordering::Acquire) {
            return Some(CancelCause::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while live, otherwise the matching cancellation error.
    #[inline]
    pub fn check(&self) -> Result<()> {
        match self.cause() {
            Some(cause) => Err(cause.into()),
            None => Ok(()),
        }
    }

    /// Ready (disconnected) once `cancel` has been called. For use in `select!`.
    pub fn done(&self) -> &Receiver<()> {
        &self.signal.done_rx
    }

    /// Fires once at the deadline; never fires without one. For use in `select!`.
    pub fn deadline_channel(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(d) => crossbeam_channel::at(d),
            None => crossbeam_channel::never(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.signal.cancelled.load(Ordering::Relaxed))
            .field("deadline", &self.deadline)
            .finish()
    }
}
