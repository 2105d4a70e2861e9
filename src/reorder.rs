//! `ReorderBuffer`: sequence-ordered delivery with gap-timeout release.
//!
//! An ordered map from record sequence number to plaintext. Insertion tracks
//! the highest sequence seen and drops anything too far behind it; flush
//! releases a contiguous run starting at the expected offset, or — once a
//! stall has lasted long enough — gives up on the missing numbers and
//! delivers whatever contiguous tail is available.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::constants::{MISS_ORDERING_LIMIT, RX_OOO_TIMEOUT};

struct Inner {
    pending: BTreeMap<u64, Vec<u8>>,
    gap_offset: u64,
    last_read_time: Instant,
}

/// Sequence-aware reorder buffer sitting between the record layer and the
/// user's data callback.
pub struct ReorderBuffer {
    inner: Mutex<Inner>,
    last_rx_seq: AtomicI64,
    flushing: AtomicBool,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        ReorderBuffer {
            inner: Mutex::new(Inner {
                pending: BTreeMap::new(),
                gap_offset: 0,
                last_read_time: Instant::now(),
            }),
            last_rx_seq: AtomicI64::new(-1),
            flushing: AtomicBool::new(false),
        }
    }

    /// Insert one record, then attempt a flush. Returns the records (in
    /// sequence order) ready for delivery to the user; empty if nothing is
    /// releasable yet.
    pub fn insert_and_flush(&self, seq: u64, payload: Vec<u8>) -> Vec<(u64, Vec<u8>)> {
        let last_rx_seq = self.last_rx_seq.load(Ordering::SeqCst);
        let seq_delta = seq as i64 - last_rx_seq;

        if seq_delta <= -MISS_ORDERING_LIMIT {
            return Vec::new();
        }

        if seq_delta > 0 {
            self.last_rx_seq.store(seq as i64, Ordering::SeqCst);
        }

        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending.insert(seq, payload);
        }

        self.flush()
    }

    /// Release whatever is ready to deliver right now, without inserting
    /// anything new. Safe to call from an external event-pump tick.
    pub fn flush(&self) -> Vec<(u64, Vec<u8>)> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Vec::new();
        }
        let result = self.flush_inner();
        self.flushing.store(false, Ordering::SeqCst);
        result
    }

    fn flush_inner(&self) -> Vec<(u64, Vec<u8>)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.pending.is_empty() {
            return Vec::new();
        }

        let mut delivered = Vec::new();

        let first_key = *inner.pending.keys().next().unwrap();
        if first_key == inner.gap_offset {
            loop {
                let next_key = match inner.pending.keys().next() {
                    Some(&k) if k == inner.gap_offset => k,
                    _ => break,
                };
                let payload = inner.pending.remove(&next_key).unwrap();
                delivered.push((next_key, payload));
                inner.gap_offset = next_key + 1;
            }
            inner.last_read_time = Instant::now();
            return delivered;
        }

        if first_key > inner.gap_offset
            && inner.last_read_time.elapsed() >= RX_OOO_TIMEOUT
        {
            let missing = first_key - inner.gap_offset;
            warn!(missing, from = inner.gap_offset, "reorder buffer gap timed out, skipping ahead");
            inner.gap_offset = first_key;
            loop {
                let next_key = match inner.pending.keys().next() {
                    Some(&k) if k == inner.gap_offset => k,
                    _ => break,
                };
                let payload = inner.pending.remove(&next_key).unwrap();
                delivered.push((next_key, payload));
                inner.gap_offset = next_key + 1;
            }
            inner.last_read_time = Instant::now();
        }

        delivered
    }

    /// Number of records currently buffered awaiting a gap to close.
    pub fn pending_len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
