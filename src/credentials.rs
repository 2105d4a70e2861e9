//! Credential bundles: anonymous and X.509 certificate-based.
//!
//! Certificate/CRL storage itself is an out-of-scope external collaborator
//! (per the session design); this module treats certificate, key, and CA
//! trust material as opaque byte blobs loaded from disk, authenticated and
//! interpreted by the handshake driver rather than parsed here. Each
//! credential handle is exclusively owned and tears itself down on drop,
//! matching the owned-native-handle pattern used for [`crate::dh::DhParams`].

use std::fs;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{SessionError, SessionResult};

/// Which wire format the CA trust file was loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaTrustFormat {
    /// ASCII-armored `-----BEGIN ...-----` PEM.
    Pem,
    /// Raw binary DER.
    Der,
}

/// CA trust material, loaded PEM-first then DER, per the construction
/// parameters.
#[derive(Debug, Clone)]
pub struct CaTrust {
    bytes: Vec<u8>,
    format: CaTrustFormat,
}

impl CaTrust {
    /// Load CA trust material from `path`, trying PEM then falling back to
    /// treating the content as raw DER.
    pub fn load(path: &Path) -> SessionResult<Self> {
        let bytes = fs::read(path)
            .map_err(|_| SessionError::Resource("failed to read CA trust file"))?;
        let format = if bytes.starts_with(b"-----BEGIN") {
            CaTrustFormat::Pem
        } else {
            CaTrustFormat::Der
        };
        Ok(CaTrust { bytes, format })
    }

    /// Construct directly from in-memory bytes, sniffing the format the
    /// same way [`CaTrust::load`] does. Useful for callers (and tests) that
    /// already have trust material in hand rather than on disk.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = if bytes.starts_with(b"-----BEGIN") {
            CaTrustFormat::Pem
        } else {
            CaTrustFormat::Der
        };
        CaTrust { bytes, format }
    }

    /// The detected wire format.
    pub fn format(&self) -> CaTrustFormat {
        self.format
    }

    /// Raw trust material bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// An optional peer CA store: an intermediate chain plus its CRL.
#[derive(Debug, Clone)]
pub struct PeerCaStore {
    /// Certificate chain bytes (opaque).
    pub chain: Vec<u8>,
    /// Certificate revocation list bytes (opaque).
    pub crl: Vec<u8>,
}

/// Local certificate chain and private key used to authenticate this end.
pub struct LocalCertChain {
    /// Certificate chain bytes (opaque), sent to the peer during handshake.
    pub certificate_chain: Vec<u8>,
    private_key: Vec<u8>,
}

impl LocalCertChain {
    /// Construct from chain and key bytes.
    pub fn new(certificate_chain: Vec<u8>, private_key: Vec<u8>) -> Self {
        LocalCertChain {
            certificate_chain,
            private_key,
        }
    }

    /// Borrow the private key material for signing during the handshake.
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl Drop for LocalCertChain {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for LocalCertChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCertChain")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Which credential kind is currently installed on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Anonymous ephemeral Diffie-Hellman, no certificate.
    Anonymous,
    /// X.509 certificate-authenticated.
    Certificate,
}

/// Certificate credential bundle: CA trust, optional peer CA store, optional
/// local chain + key (servers and mutually-authenticating clients supply
/// one; clients that only verify the server may omit it).
#[derive(Debug)]
pub struct CertificateCredentials {
    /// CA trust list used to verify the peer's certificate.
    pub ca_trust: CaTrust,
    /// Optional intermediate CA + CRL pair.
    pub peer_ca_store: Option<PeerCaStore>,
    /// This endpoint's own certificate chain and key, if authenticating.
    pub local_chain: Option<LocalCertChain>,
}

/// The credential bundle currently installed on a session: either anonymous
/// or certificate, installed exclusively (never both at once — the FSM
/// tears one down before installing the other during anon→cert
/// renegotiation).
#[derive(Debug)]
pub enum Credentials {
    /// Anonymous ephemeral DH mode.
    Anonymous,
    /// Certificate-authenticated mode.
    Certificate(CertificateCredentials),
}

impl Credentials {
    /// Install anonymous credentials.
    pub fn anonymous() -> Self {
        Credentials::Anonymous
    }

    /// Install certificate credentials from already-loaded material.
    pub fn certificate(
        ca_trust: CaTrust,
        peer_ca_store: Option<PeerCaStore>,
        local_chain: Option<LocalCertChain>,
    ) -> Self {
        Credentials::Certificate(CertificateCredentials {
            ca_trust,
            peer_ca_store,
            local_chain,
        })
    }

    /// Which kind is currently installed.
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credentials::Anonymous => CredentialKind::Anonymous,
            Credentials::Certificate(_) => CredentialKind::Certificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn anonymous_credentials_report_their_kind() {
        let creds = Credentials::anonymous();
        assert_eq!(creds.kind(), CredentialKind::Anonymous);
    }

    #[test]
    fn certificate_credentials_report_their_kind() {
        let ca = CaTrust::from_bytes(vec![1, 2, 3]);
        let creds = Credentials::certificate(ca, None, None);
        assert_eq!(creds.kind(), CredentialKind::Certificate);
    }

    #[test]
    fn ca_trust_detects_pem_format() {
        let mut file = tempfile_with(b"-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n");
        let trust = CaTrust::load(file.path()).unwrap();
        assert_eq!(trust.format(), CaTrustFormat::Pem);
        file.flush().ok();
    }

    #[test]
    fn ca_trust_falls_back_to_der() {
        let file = tempfile_with(&[0x30, 0x82, 0x01, 0x0a]);
        let trust = CaTrust::load(file.path()).unwrap();
        assert_eq!(trust.format(), CaTrustFormat::Der);
    }

    #[test]
    fn local_cert_chain_redacts_key_in_debug() {
        let chain = LocalCertChain::new(vec![1, 2, 3], vec![9, 9, 9]);
        let debug = format!("{:?}", chain);
        assert!(!debug.contains('9'));
    }

    fn tempfile_with(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new();
        file.handle.write_all(contents).unwrap();
        file
    }

    // Minimal dependency-free temp file helper (avoids adding a `tempfile`
    // dev-dependency just for two tests).
    struct NamedTempFile {
        handle: fs::File,
        path: std::path::PathBuf,
    }

    impl NamedTempFile {
        fn new() -> Self {
            let mut path = std::env::temp_dir();
            path.push(format!(
                "dtls-session-core-test-{:?}-{}",
                std::thread::current().id(),
                crate::crypto::random::random_bytes(8)
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>()
            ));
            let handle = fs::File::create(&path).unwrap();
            NamedTempFile { handle, path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}
