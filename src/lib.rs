//! DTLS session core: a dedicated-worker state machine driving one DTLS-like
//! session to completion over an externally supplied datagram transport.
//!
//! Handles anonymous-then-certificate (or certificate-only) handshakes,
//! stateless cookie-based DoS protection before committing server resources,
//! heartbeat-based path MTU discovery, and a sequence-aware reorder buffer
//! for delivering plaintext in order. See [`session::Session`] for the
//! entry point.

#![warn(rust_2018_idioms)]

pub mod audit;
pub mod config;
pub mod constants;
pub mod cookie;
pub mod credentials;
pub mod crypto;
pub mod dh;
pub mod error;
pub mod handshake;
pub mod pmtu;
pub mod record;
pub mod reorder;
pub mod rx_queue;
pub mod session;
pub mod socket;
pub mod time;

pub use config::{CertificateParams, SessionCallbacks, SessionConfig, WireProfile};
pub use credentials::{CaTrust, Credentials, CredentialKind, LocalCertChain, PeerCaStore};
pub use dh::{DhParams, DhParamsFuture};
pub use error::{SessionError, SessionResult};
pub use handshake::Role;
pub use session::{Session, SessionState, SessionStats, SessionStatsSnapshot};
pub use socket::PacketSocket;

/// Crate version, re-exported for callers that want to log or negotiate it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
