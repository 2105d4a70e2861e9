//! Property-based and scenario tests for the reorder buffer's delivery
//! ordering guarantees.

use std::time::Duration;

use dtls_session_core::constants::{MISS_ORDERING_LIMIT, RX_OOO_TIMEOUT};
use proptest::prelude::*;

use dtls_session_core::reorder::ReorderBuffer;

#[test]
fn out_of_order_burst_delivers_in_sequence_order() {
    let buffer = ReorderBuffer::new();
    let arrivals = [100u64, 101, 103, 102, 104];
    let mut delivered = Vec::new();

    for &seq in &arrivals {
        let payload = seq.to_be_bytes().to_vec();
        delivered.extend(buffer.insert_and_flush(seq, payload));
    }

    let delivered_seqs: Vec<u64> = delivered.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(delivered_seqs, vec![100, 101, 102, 103, 104]);
    assert_eq!(buffer.pending_len(), 0);
}

proptest! {
    /// However a permutation of a contiguous sequence run arrives, delivery
    /// across the whole run (once everything has arrived) is non-decreasing
    /// and loses nothing within the reorder window.
    #[test]
    fn any_permutation_of_a_contiguous_run_delivers_in_order(
        start in 0u64..10_000,
        len in 1usize..40,
        seed in any::<u64>(),
    ) {
        let mut seqs: Vec<u64> = (start..start + len as u64).collect();
        // Deterministic shuffle from the proptest-supplied seed, no RNG
        // crate dependency needed for a simple Fisher-Yates.
        let mut state = seed | 1;
        for i in (1..seqs.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state as usize) % (i + 1);
            seqs.swap(i, j);
        }

        let buffer = ReorderBuffer::new();
        let mut delivered = Vec::new();
        for &seq in &seqs {
            delivered.extend(buffer.insert_and_flush(seq, seq.to_be_bytes().to_vec()));
        }

        let delivered_seqs: Vec<u64> = delivered.iter().map(|(seq, _)| *seq).collect();
        let mut expected: Vec<u64> = (start..start + len as u64).collect();
        expected.sort_unstable();
        prop_assert_eq!(delivered_seqs, expected);
        prop_assert_eq!(buffer.pending_len(), 0);
    }

    /// A record far enough behind the highest sequence seen is dropped
    /// outright rather than buffered, regardless of how it got there.
    #[test]
    fn records_past_the_miss_ordering_limit_never_deliver(
        high in (MISS_ORDERING_LIMIT as u64 + 10)..100_000,
        behind in (MISS_ORDERING_LIMIT as u64)..(MISS_ORDERING_LIMIT as u64 + 1000),
    ) {
        let buffer = ReorderBuffer::new();
        buffer.insert_and_flush(high, vec![1]);
        let late_seq = high - behind;
        let delivered = buffer.insert_and_flush(late_seq, vec![2]);
        prop_assert!(delivered.iter().all(|(seq, _)| *seq != late_seq));
    }
}

#[test]
fn stalled_gap_releases_tail_after_timeout_without_losing_later_records() {
    let buffer = ReorderBuffer::new();
    assert!(buffer.insert_and_flush(10, vec![10]).is_empty());
    assert!(buffer.insert_and_flush(11, vec![11]).is_empty());
    assert_eq!(buffer.pending_len(), 2);

    std::thread::sleep(RX_OOO_TIMEOUT + Duration::from_millis(50));
    let delivered = buffer.flush();
    assert_eq!(delivered, vec![(10, vec![10]), (11, vec![11])]);
    assert_eq!(buffer.pending_len(), 0);
}
