//! Thread-safe FIFO used to hand items from one pipeline stage to the next.
//!
//! A [`HandoffQueue`] owns every item between `push` and `pop`. Ownership moves
//! in with `push` and moves out with a successful pop, so the queue never copies
//! or inspects its payload.
//!
//! # Pop Modes
//!
//! The empty-queue behaviour is always chosen explicitly by the caller:
//!
//! - [`HandoffQueue::pop`] blocks until an item arrives, the queue is closed and
//!   drained ([`QueueError::Closed`]), or the cancellation token fires
//!   ([`QueueError::Cancelled`]).
//! - [`HandoffQueue::pop_timeout`] blocks at most `timeout` ([`QueueError::TimedOut`]).
//! - [`HandoffQueue::try_pop`] never blocks and fails with [`QueueError::Empty`].
//!
//! [`HandoffQueue::is_empty`] and [`HandoffQueue::len`] are snapshots. Another
//! thread may push or pop right after they return, so they are for progress
//! reporting only. Use the result of a pop for control flow.
//!
//! # Example
//!
//! ```rust
//! use daq_core::handoff::HandoffQueue;
//! use daq_core::error::QueueError;
//!
//! let queue = HandoffQueue::with_name("raw");
//! queue.push(1u32);
//! queue.push(2u32);
//! queue.close();
//!
//! assert_eq!(queue.try_pop(), Ok(1));
//! assert_eq!(queue.try_pop(), Ok(2));
//! assert_eq!(queue.try_pop(), Err(QueueError::Closed));
//! ```

use crate::error::QueueError;
use crate::limits::CANCEL_POLL_INTERVAL;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded, mutex-protected FIFO of ownership-transferred items.
pub struct HandoffQueue<T> {
    name: String,
    inner: Mutex<Inner<T>>,
    /// Signalled on push and on close
    available: Condvar,
    pushed: AtomicU64,
}

impl<T> HandoffQueue<T> {
    /// Create an unnamed queue.
    pub fn new() -> Self {
        Self::with_name("unnamed")
    }

    /// Create a queue with a label used in diagnostics.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            pushed: AtomicU64::new(0),
        }
    }

    /// Diagnostic label of this queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item to the tail and wake one waiting consumer.
    ///
    /// Never fails. Items pushed after [`close`](Self::close) are still
    /// delivered in order.
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            inner.items.push_back(item);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Remove the head item without blocking.
    ///
    /// The emptiness check and the removal happen under the same lock, so this
    /// is the race-free replacement for "check `is_empty()`, then pop".
    pub fn try_pop(&self) -> Result<T, QueueError> {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(item) => Ok(item),
            None if inner.closed => Err(QueueError::Closed),
            None => Err(QueueError::Empty),
        }
    }

    /// Remove the head item, waiting for one if the queue is empty.
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed and every item has
    /// been handed out, and [`QueueError::Cancelled`] if `cancel` fires while
    /// waiting.
    pub fn pop(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            // Bounded wait so a cancellation is observed without a dedicated waker
            self.available.wait_for(&mut inner, CANCEL_POLL_INTERVAL);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn pop_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, QueueError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.pop(cancel);
        };
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::TimedOut);
            }
            let wait = (deadline - now).min(CANCEL_POLL_INTERVAL);
            self.available.wait_for(&mut inner, wait);
        }
    }

    /// Mark the end of the stream and wake every waiting consumer.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Snapshot: true if no item was queued at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Snapshot of the number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Total number of items ever pushed.
    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Take every queued item, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().items.drain(..).collect()
    }

    /// Drop every queued item and return how many were discarded.
    pub fn discard(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            let n = inner.items.len();
            inner.items.clear();
            n
        };
        if discarded > 0 {
            debug!(queue = %self.name, discarded, "Discarded queued items");
        }
        discarded
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HandoffQueue")
            .field("name", &self.name)
            .field("len", &inner.items.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
