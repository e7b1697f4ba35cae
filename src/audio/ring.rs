//! Bounded SPSC chunk queue between the capture callback and the consumer
//! thread.
//!
//! The producer side never blocks: on overflow the oldest unread chunk is
//! overwritten and a drop counter incremented. The critical section is a
//! push/pop on a pre-sized deque, so its worst case does not depend on fill
//! level. Only the consumer-side `pop_blocking` waits.

use crate::pipeline::types::ConvertedChunk;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Fixed-capacity circular buffer of [`ConvertedChunk`]s for one channel.
pub struct ChunkRing {
    queue: Mutex<VecDeque<ConvertedChunk>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl ChunkRing {
    /// Creates a ring holding at most `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a chunk without blocking.
    ///
    /// On a full ring the oldest unconsumed chunk is discarded and counted;
    /// the new chunk always lands. Safe to call from the capture callback.
    pub fn push(&self, chunk: ConvertedChunk) {
        let Ok(mut queue) = self.queue.lock() else {
            // Consumer panicked while holding the lock; capture must not.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(chunk);
        drop(queue);
        self.available.notify_one();
    }

    /// Dequeues the oldest chunk, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout — not an error; the consumer uses timeouts
    /// for liveness polling and shutdown checks. Consumer side only, never
    /// called from the capture callback.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<ConvertedChunk> {
        let mut queue = self.queue.lock().ok()?;
        if queue.is_empty() {
            let (guard, wait) = self
                .available
                .wait_timeout_while(queue, timeout, |q| q.is_empty())
                .ok()?;
            queue = guard;
            if wait.timed_out() && queue.is_empty() {
                return None;
            }
        }
        queue.pop_front()
    }

    /// Dequeues without waiting. Used when draining at shutdown.
    pub fn pop(&self) -> Option<ConvertedChunk> {
        self.queue.lock().ok()?.pop_front()
    }

    /// Chunks overwritten because the consumer fell behind.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Chunks currently waiting to be consumed.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
