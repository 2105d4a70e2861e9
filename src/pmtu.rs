//! `PmtuProbe`: heartbeat-based path MTU discovery.
//!
//! The client actively walks an ascending MTU ladder, pinging each rung and
//! stepping back on the first timeout. The server never probes; it only
//! tallies pings received while `ESTABLISHED` and infers the path MTU from
//! the count once the first plaintext datagram arrives.

use tracing::debug;

use crate::constants::{
    HEARTBEAT_RETRANS_TIMEOUT, HEARTBEAT_TRIES, MTUS, RECORD_OVERHEAD, UDP_HEADER_SIZE,
};
use crate::error::{SessionError, SessionResult};
use crate::socket::PacketSocket;

const HEARTBEAT_HEADER_SIZE: usize = 3;
const MSG_HEARTBEAT_PING: u8 = 1;
const MSG_HEARTBEAT_PONG: u8 = 2;

fn bytes_to_send(candidate: usize, transport_overhead: usize) -> usize {
    candidate
        .saturating_sub(HEARTBEAT_HEADER_SIZE)
        .saturating_sub(RECORD_OVERHEAD)
        .saturating_sub(UDP_HEADER_SIZE)
        .saturating_sub(transport_overhead)
}

fn encode_ping(payload_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; HEARTBEAT_HEADER_SIZE + payload_size];
    out[0] = MSG_HEARTBEAT_PING;
    let len_bytes = (payload_size as u16).to_be_bytes();
    out[1] = len_bytes[0];
    out[2] = len_bytes[1];
    out
}

fn encode_pong() -> Vec<u8> {
    vec![MSG_HEARTBEAT_PONG, 0, 0]
}

fn is_ping(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes[0] == MSG_HEARTBEAT_PING
}

fn is_pong(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes[0] == MSG_HEARTBEAT_PONG
}

/// Final MTU decision, however it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtuOutcome {
    /// The ladder entry selected.
    pub selected_mtu: usize,
    /// `selected_mtu` minus UDP and transport overhead: what the crypto
    /// layer is told as its working MTU.
    pub dtls_mtu: usize,
    /// Usable plaintext payload per record at `dtls_mtu`.
    pub max_payload: usize,
}

fn finalize(selected_mtu: usize, transport_overhead: usize) -> PmtuOutcome {
    let dtls_mtu = selected_mtu
        .saturating_sub(UDP_HEADER_SIZE)
        .saturating_sub(transport_overhead);
    let max_payload = dtls_mtu.saturating_sub(RECORD_OVERHEAD);
    PmtuOutcome {
        selected_mtu,
        dtls_mtu,
        max_payload,
    }
}

/// Drives PMTU discovery from the client side, or exposes the server's
/// passive-inference helper.
pub struct PmtuProbe;

impl PmtuProbe {
    /// Actively probe the MTU ladder as the client. `peer_allows_heartbeat`
    /// reflects whether the peer advertised willingness to receive
    /// heartbeat pings during the handshake; if `false`, discovery
    /// completes immediately at the floor MTU.
    pub fn probe_client(
        socket: &dyn PacketSocket,
        peer_allows_heartbeat: bool,
    ) -> SessionResult<PmtuOutcome> {
        let overhead = socket.transport_overhead();

        if !peer_allows_heartbeat {
            return Ok(finalize(MTUS[0], overhead));
        }

        let mut selected = None;
        for &candidate in MTUS.iter() {
            let size = bytes_to_send(candidate, overhead);
            let ping = encode_ping(size);

            let mut acked = false;
            for _try in 0..HEARTBEAT_TRIES {
                if socket.send_to(&ping).is_err() {
                    break;
                }
                if let Some(reply) = socket.recv_timeout(HEARTBEAT_RETRANS_TIMEOUT) {
                    if is_pong(&reply) {
                        acked = true;
                        break;
                    }
                }
            }

            if acked {
                debug!(candidate, "pmtu ladder rung acked");
                selected = Some(candidate);
            } else {
                debug!(candidate, "pmtu ladder rung timed out, stepping back");
                break;
            }
        }

        let selected_mtu = selected.unwrap_or(MTUS[0]);
        Ok(finalize(selected_mtu, overhead))
    }

    /// Reply to an inbound heartbeat ping with a pong, if `raw` is one.
    /// Returns whether it was a ping (and thus handled).
    pub fn reply_if_ping(socket: &dyn PacketSocket, raw: &[u8]) -> bool {
        if is_ping(raw) {
            let _ = socket.send_to(&encode_pong());
            true
        } else {
            false
        }
    }

    /// Server-side passive inference: zero pings received floors at
    /// `MTUS[0]`; each ping after the first advances one rung, so
    /// `ping_count` indexes the ladder at `ping_count - 1`, clamped to its
    /// bounds.
    pub fn infer_server(ping_count: u32, transport_overhead: usize) -> PmtuOutcome {
        let index = (ping_count as usize)
            .saturating_sub(1)
            .min(MTUS.len() - 1);
        finalize(MTUS[index], transport_overhead)
    }
}
