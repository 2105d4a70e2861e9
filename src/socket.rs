//! `PacketSocket`: the out-of-scope external transport, expressed as a trait.
//!
//! The ICE-negotiated packet transport and its socket are external
//! collaborators referenced only via their interface. This trait is that
//! interface; production callers supply their own implementation wrapping a
//! real UDP-like socket. [`LoopbackSocket`] is an in-memory pair used only by
//! this crate's own tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A send/receive endpoint for raw datagrams, with transport overhead
/// accounting for PMTU arithmetic.
///
/// Implementations must make `send_to` non-blocking from the caller's
/// perspective (the FSM worker calls it while holding the send mutex) and
/// `recv_timeout` must return promptly once data is available or the
/// timeout elapses.
pub trait PacketSocket: Send + Sync {
    /// Send one datagram. Returns the number of bytes written, or an I/O
    /// error description on failure.
    fn send_to(&self, data: &[u8]) -> Result<usize, String>;

    /// Block up to `timeout` for the next inbound datagram. `None` on
    /// timeout with nothing received.
    fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>>;

    /// Per-datagram bytes added by layers below UDP (e.g. TURN framing).
    /// Zero for a direct UDP socket.
    fn transport_overhead(&self) -> usize {
        0
    }
}

struct LoopbackShared {
    inbox: Mutex<VecDeque<Vec<u8>>>,
    cvar: Condvar,
    outbox: Mutex<VecDeque<Vec<u8>>>,
}

/// An in-memory socket pair for tests: bytes sent on one end appear in the
/// other's `recv_timeout`, and vice versa.
#[derive(Clone)]
pub struct LoopbackSocket {
    local: Arc<LoopbackShared>,
    peer: Arc<LoopbackShared>,
    overhead: usize,
}

impl LoopbackSocket {
    /// Construct a connected pair of loopback sockets with zero transport
    /// overhead.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_overhead(0)
    }

    /// Construct a connected pair with the given simulated transport
    /// overhead (useful for exercising PMTU arithmetic).
    pub fn pair_with_overhead(overhead: usize) -> (Self, Self) {
        let a = Arc::new(LoopbackShared {
            inbox: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
            outbox: Mutex::new(VecDeque::new()),
        });
        let b = Arc::new(LoopbackShared {
            inbox: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
            outbox: Mutex::new(VecDeque::new()),
        });
        (
            LoopbackSocket {
                local: a.clone(),
                peer: b.clone(),
                overhead,
            },
            LoopbackSocket {
                local: b,
                peer: a,
                overhead,
            },
        )
    }
}

impl PacketSocket for LoopbackSocket {
    fn send_to(&self, data: &[u8]) -> Result<usize, String> {
        let mut inbox = self.peer.inbox.lock().unwrap_or_else(|e| e.into_inner());
        inbox.push_back(data.to_vec());
        self.peer.cvar.notify_all();
        {
            let mut outbox = self.local.outbox.lock().unwrap_or_else(|e| e.into_inner());
            outbox.push_back(data.to_vec());
        }
        Ok(data.len())
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut inbox = self.local.inbox.lock().unwrap_or_else(|e| e.into_inner());
        if inbox.is_empty() {
            let (guard, result) = self
                .local
                .cvar
                .wait_timeout_while(inbox, timeout, |q| q.is_empty())
                .unwrap_or_else(|e| e.into_inner());
            inbox = guard;
            if result.timed_out() && inbox.is_empty() {
                return None;
            }
        }
        inbox.pop_front()
    }

    fn transport_overhead(&self) -> usize {
        self.overhead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_delivers_sent_bytes() {
        let (a, b) = LoopbackSocket::pair();
        a.send_to(b"hello").unwrap();
        let received = b.recv_timeout(Duration::from_millis(100));
        assert_eq!(received, Some(b"hello".to_vec()));
    }

    #[test]
    fn loopback_times_out_with_no_data() {
        let (_a, b) = LoopbackSocket::pair();
        let received = b.recv_timeout(Duration::from_millis(20));
        assert_eq!(received, None);
    }

    #[test]
    fn overhead_is_reported() {
        let (a, _b) = LoopbackSocket::pair_with_overhead(16);
        assert_eq!(a.transport_overhead(), 16);
    }
}
