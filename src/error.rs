//! Session error taxonomy.

use thiserror::Error;

use crate::session::fsm::SessionState;

/// Errors surfaced by the DTLS session core.
///
/// Every error kind named in the session design maps to exactly one variant
/// here; the FSM matches on these variants to decide whether a failure is
/// fatal (`SHUTDOWN`), transient (retry in place), or a stepped-back PMTU
/// probe outcome, rather than matching on strings.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// Handshake is unrecoverable: bad transcript, rejected certificate,
    /// missing safe-renegotiation, or an unexpected credential kind.
    #[error("fatal handshake error in state {state:?}: {reason}")]
    FatalHandshake {
        /// FSM state active when the failure occurred.
        state: SessionState,
        /// Human-readable reason, also fed to the audit sink.
        reason: &'static str,
    },

    /// Record layer is broken beyond recovery (AEAD open failure on a record
    /// that should have decrypted, or malformed record framing).
    #[error("record layer error: {0}")]
    RecordLayer(&'static str),

    /// Cryptographic operation would block or was interrupted; caller should
    /// retry without a state transition.
    #[error("transient error: {0}")]
    Transient(&'static str),

    /// Resource exhaustion or allocation failure during credential/DH setup.
    #[error("resource error: {0}")]
    Resource(&'static str),

    /// Cookie verification rejected the inbound datagram.
    #[error("cookie rejected")]
    CookieRejected,

    /// A wait (cookie, heartbeat) exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// RxQueue was full; oldest entry dropped to make room.
    #[error("rx queue full, dropped oldest entry")]
    QueueFull,

    /// Operation not permitted in the current FSM state (e.g. send before
    /// `ESTABLISHED`, MTU query after `SHUTDOWN`).
    #[error("invalid session state for this operation: {0:?}")]
    InvalidState(SessionState),

    /// The peer's certificate failed the user's verification callback.
    #[error("certificate verification rejected by caller")]
    CertificateRejected,

    /// The session was shut down while the operation was in flight.
    #[error("session shut down")]
    ShuttingDown,
}

/// Result alias used throughout this crate.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// True for errors that must drive the FSM to `SHUTDOWN`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::FatalHandshake { .. }
                | SessionError::RecordLayer(_)
                | SessionError::Resource(_)
        )
    }

    /// True for errors that should be retried in place without changing state.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let err = SessionError::FatalHandshake {
            state: SessionState::Handshake,
            reason: "bad transcript",
        };
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        let err = SessionError::Transient("again");
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn display_includes_state() {
        let err = SessionError::InvalidState(SessionState::Setup);
        assert!(err.to_string().contains("Setup"));
    }
}
