//! Bounded blocking queue for cross-thread sample handoff
//!
//! [`RingBuffer`] decouples the trace reader thread (producing decoded
//! samples as fast as probe I/O allows) from the acquisition loop that
//! paces consumption. It is a classic mutex plus two condition variables
//! (not-empty / not-full) bounded queue.
//!
//! `push` waits a bounded time for free capacity and reports failure on
//! timeout so the producer can count the overrun and drop that sample
//! instead of stalling hardware reads. `pop` blocks until an item arrives;
//! consumers that also need to observe a stop request use
//! [`RingBuffer::pop_timeout`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Fixed-capacity blocking FIFO
pub struct RingBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> RingBuffer<T> {
    /// Create a ring buffer with the given fixed capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Capacity fixed at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advisory element count; racy by design, for diagnostics only
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Advisory emptiness check; racy by design
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push an item, waiting up to `timeout` for free capacity.
    ///
    /// Returns `false` (and drops the item) if the queue stayed full for the
    /// whole wait; the caller treats that as an overrun.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> bool {
        let Ok(mut queue) = self.queue.lock() else {
            return false;
        };
        while queue.len() >= self.capacity {
            let (q, result) = match self.not_full.wait_timeout(queue, timeout) {
                Ok(r) => r,
                Err(_) => return false,
            };
            queue = q;
            if result.timed_out() && queue.len() >= self.capacity {
                return false;
            }
        }
        queue.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Pop the oldest item, blocking until one is available
    pub fn pop(&self) -> Option<T> {
        let mut queue = self.queue.lock().ok()?;
        while queue.is_empty() {
            queue = self.not_empty.wait(queue).ok()?;
        }
        let item = queue.pop_front();
        self.not_full.notify_one();
        item
    }

    /// Pop the oldest item, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout so the consumer's loop can check its
    /// running flag between waits.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.queue.lock().ok()?;
        while queue.is_empty() {
            let (q, result) = self.not_empty.wait_timeout(queue, timeout).ok()?;
            queue = q;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
        let item = queue.pop_front();
        self.not_full.notify_one();
        item
    }

    /// Discard all queued items
    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
            self.not_full.notify_all();
        }
    }
}
