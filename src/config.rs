//! Session configuration: a serializable policy profile plus the runtime
//! surface (credentials, callbacks) that can't be serialized.
//!
//! `WireProfile` is the small, `Serialize`/`Deserialize` policy subset a
//! caller might load from disk or negotiate out of band, while
//! [`SessionConfig`] is the full construction-time surface, carrying the
//! parts (credentials, callbacks, the transport) that only make sense
//! in-process.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DTLS_RETRANSMIT_TIMEOUT;
use crate::credentials::PeerCaStore;

/// Serializable negotiation policy: the subset of session behavior that
/// could reasonably be loaded from a config file or exchanged out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireProfile {
    /// Whether to offer anonymous key exchange before falling back to
    /// certificate-only (selects [`crate::handshake::PriorityString::Full`]
    /// vs `CertificateOnly`).
    pub anonymous_first: bool,
    /// Overall handshake timeout in milliseconds; the effective timeout is
    /// `max(this, DTLS_RETRANSMIT_TIMEOUT)`.
    pub handshake_timeout_ms: u64,
}

impl Default for WireProfile {
    fn default() -> Self {
        WireProfile {
            anonymous_first: true,
            handshake_timeout_ms: DTLS_RETRANSMIT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl WireProfile {
    /// The effective handshake timeout: never less than the DTLS
    /// retransmit timeout, i.e. `max(user_timeout, retransmit_timeout)`.
    pub fn effective_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms).max(DTLS_RETRANSMIT_TIMEOUT)
    }
}

/// Certificate construction parameters, gathered here so [`SessionConfig`]
/// doesn't need a dozen loose `Option` fields.
#[derive(Debug, Clone, Default)]
pub struct CertificateParams {
    /// CA trust file path, PEM tried first then DER.
    pub ca_trust_path: Option<PathBuf>,
    /// Optional intermediate CA + CRL pair.
    pub peer_ca_store: Option<PeerCaStore>,
    /// This endpoint's own certificate chain bytes, if authenticating.
    pub local_certificate_chain: Option<Vec<u8>>,
    /// This endpoint's own private key bytes, if authenticating.
    pub local_private_key: Option<Vec<u8>>,
}

/// Full session construction parameters.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Negotiation policy.
    pub wire_profile: WireProfile,
    /// Certificate material, if this endpoint can authenticate with one.
    pub certificate: CertificateParams,
    /// Opaque identifier for the transport component this session rides on
    /// (e.g. the ICE component id). Fed into the `COOKIE`-state cookie gate
    /// as the `client_addr` half of the HMAC input, so it only needs to be
    /// stable for the lifetime of one transport, not globally unique.
    pub component_id: Vec<u8>,
}

/// All-optional callback surface. Trait objects can't derive `Default`, so
/// construct via [`SessionCallbacks::builder`] rather than struct literal.
pub struct SessionCallbacks {
    /// User policy during handshake; returning `false` aborts it.
    pub verify_certificate: Option<Box<dyn Fn(&[u8]) -> bool + Send + Sync>>,
    /// Invoked once after a successful certificate-authenticated handshake
    /// with `(local_chain, remote_chain, remote_chain_count)`.
    pub on_certificates_update: Option<Box<dyn Fn(Option<&[u8]>, Option<&[u8]>, usize) + Send + Sync>>,
    /// Invoked whenever the FSM transitions to a new state.
    pub on_state_change: Option<Box<dyn Fn(crate::session::fsm::SessionState) + Send + Sync>>,
    /// Invoked for each plaintext payload released by the reorder buffer,
    /// in order.
    pub on_rx_data: Option<Box<dyn Fn(&[u8]) + Send + Sync>>,
}

impl SessionCallbacks {
    /// Start building a callback set with nothing registered.
    pub fn builder() -> SessionCallbacksBuilder {
        SessionCallbacksBuilder::default()
    }
}

/// Builder for [`SessionCallbacks`], since the target struct can't derive
/// `Default` itself.
#[derive(Default)]
pub struct SessionCallbacksBuilder {
    verify_certificate: Option<Box<dyn Fn(&[u8]) -> bool + Send + Sync>>,
    on_certificates_update: Option<Box<dyn Fn(Option<&[u8]>, Option<&[u8]>, usize) + Send + Sync>>,
    on_state_change: Option<Box<dyn Fn(crate::session::fsm::SessionState) + Send + Sync>>,
    on_rx_data: Option<Box<dyn Fn(&[u8]) + Send + Sync>>,
}

impl SessionCallbacksBuilder {
    pub fn verify_certificate(
        mut self,
        f: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.verify_certificate = Some(Box::new(f));
        self
    }

    pub fn on_certificates_update(
        mut self,
        f: impl Fn(Option<&[u8]>, Option<&[u8]>, usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_certificates_update = Some(Box::new(f));
        self
    }

    pub fn on_state_change(
        mut self,
        f: impl Fn(crate::session::fsm::SessionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(f));
        self
    }

    pub fn on_rx_data(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_rx_data = Some(Box::new(f));
        self
    }

    pub fn build(self) -> SessionCallbacks {
        SessionCallbacks {
            verify_certificate: self.verify_certificate,
            on_certificates_update: self.on_certificates_update,
            on_state_change: self.on_state_change,
            on_rx_data: self.on_rx_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_wire_profile_is_anonymous_first() {
        let profile = WireProfile::default();
        assert!(profile.anonymous_first);
    }

    #[test]
    fn effective_timeout_never_drops_below_retransmit_timeout() {
        let profile = WireProfile {
            anonymous_first: true,
            handshake_timeout_ms: 10,
        };
        assert_eq!(
            profile.effective_handshake_timeout(),
            DTLS_RETRANSMIT_TIMEOUT
        );
    }

    #[test]
    fn effective_timeout_respects_longer_user_value() {
        let profile = WireProfile {
            anonymous_first: true,
            handshake_timeout_ms: 5_000,
        };
        assert_eq!(
            profile.effective_handshake_timeout(),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn builder_assembles_optional_callbacks() {
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        let callbacks = SessionCallbacks::builder()
            .on_rx_data(move |_| called_clone.store(true, std::sync::atomic::Ordering::SeqCst))
            .build();
        assert!(callbacks.verify_certificate.is_none());
        if let Some(cb) = &callbacks.on_rx_data {
            cb(b"x");
        }
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
