//! Protocol constants for the DTLS session core.
//!
//! All timing, sizing, and MTU-ladder values named by the design are
//! collected here rather than scattered as magic numbers through the FSM
//! and its components.

use std::time::Duration;

/// Ecosystem-provided floor MTU: the smallest MTU DTLS is required to work
/// over (conservative IPv4 minimum minus headroom).
pub const MIN_MTU: usize = 576;

/// Baseline DTLS MTU used before PMTU discovery narrows it down.
pub const DTLS_MTU: usize = MIN_MTU;

/// Ascending ladder of candidate MTUs probed during PMTU discovery.
pub const MTUS: [usize; 3] = [MIN_MTU, 800, 1280];

/// Capacity of the inbound ciphertext datagram queue.
pub const INPUT_MAX_SIZE: usize = 1000;

/// Read buffer size used when pulling a datagram off the wire.
pub const INPUT_BUFFER_SIZE: usize = 16384;

/// Cumulative bytes of invalid-cookie traffic before flood pacing kicks in.
pub const FLOOD_THRESHOLD: usize = 4096;

/// Sleep applied once `FLOOD_THRESHOLD` is crossed in the `COOKIE` state.
pub const FLOOD_PAUSE: Duration = Duration::from_millis(100);

/// Maximum time to wait for a datagram while in the `COOKIE` state.
pub const COOKIE_TIMEOUT: Duration = Duration::from_secs(10);

/// DTLS retransmit timeout used during the handshake.
pub const DTLS_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Per-try heartbeat timeout used by the PMTU ladder probe.
pub const HEARTBEAT_RETRANS_TIMEOUT: Duration = Duration::from_millis(700);

/// Number of heartbeat retransmission attempts per probed MTU.
pub const HEARTBEAT_TRIES: u32 = 1;

/// Reorder buffer window: a sequence number this far below the highest seen
/// is dropped as too old rather than buffered.
pub const MISS_ORDERING_LIMIT: i64 = 32;

/// Gap timeout: how long a stalled reorder buffer waits before declaring the
/// missing sequence numbers lost and delivering the tail.
pub const RX_OOO_TIMEOUT: Duration = Duration::from_millis(1500);

/// UDP header size, subtracted from candidate MTUs to get usable payload.
pub const UDP_HEADER_SIZE: usize = 8;

/// Heartbeat extension header size (type + length), subtracted from a
/// candidate MTU before deciding how many probe bytes to send.
pub const HEARTBEAT_HEADER_SIZE: usize = 3;

/// Per-record AEAD overhead: 8-byte sequence number, 12-byte transmitted
/// nonce, and a 16-byte Poly1305 tag.
pub const RECORD_OVERHEAD: usize = 8 + 12 + 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_ladder_is_ascending() {
        for pair in MTUS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn ladder_floor_matches_min_mtu() {
        assert_eq!(MTUS[0], MIN_MTU);
    }
}
