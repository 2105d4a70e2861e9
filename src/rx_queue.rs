//! Bounded FIFO queue of decrypted application records handed to the user.
//!
//! Capacity is fixed at [`crate::constants::INPUT_MAX_SIZE`]; once full, the
//! oldest entry is dropped to make room for the newest rather than blocking
//! the worker thread or rejecting the new record. Callers that care can poll
//! [`RxQueue::dropped_count`] to notice loss.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::constants::INPUT_MAX_SIZE;

/// Bounded, drop-oldest-on-overflow FIFO of decrypted application payloads.
pub struct RxQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    cvar: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl RxQueue {
    /// Construct with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(INPUT_MAX_SIZE)
    }

    /// Construct with an explicit capacity (tests exercise overflow with a
    /// small one).
    pub fn with_capacity(capacity: usize) -> Self {
        RxQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            cvar: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a decrypted payload, dropping the oldest queued entry first if
    /// the queue is already at capacity.
    pub fn push(&self, payload: Vec<u8>) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(payload);
        self.cvar.notify_one();
    }

    /// Pop the oldest payload without blocking.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.pop_front()
    }

    /// Pop the oldest payload, blocking up to `timeout` if the queue is
    /// currently empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let (mut items, _) = self
            .cvar
            .wait_timeout_while(items, timeout, |q| q.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        items.pop_front()
    }

    /// Current number of queued payloads.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the queue currently holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payloads dropped to overflow since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_is_fifo() {
        let queue = RxQueue::new();
        queue.push(vec![1]);
        queue.push(vec![2]);
        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), Some(vec![2]));
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = RxQueue::with_capacity(2);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), Some(vec![3]));
        assert_eq!(queue.dropped_count(), 1);
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue = RxQueue::new();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn pop_timeout_wakes_on_push_from_other_thread() {
        let queue = Arc::new(RxQueue::new());
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(vec![42]);
        });
        let received = queue.pop_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(received, Some(vec![42]));
    }
}
